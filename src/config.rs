use std::str::FromStr;

use crate::error::{Error, Result};

/// Which transitions feed the Q update after each real step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperienceMode {
    /// The observed transition with the raw reward
    Standard,
    /// The observed transition with the environment's shaped reward
    Shaped,
    /// The environment's counterfactual transitions (already shaped if shaping is on)
    Counterfactual,
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct LearnConfig {
    /// Step size (alpha)
    pub learning_rate: f64,
    /// Number of environment steps to train for
    pub total_steps: usize,
    /// Epsilon-greedy exploration probability
    pub exploration_rate: f64,
    /// Discount factor (gamma)
    pub discount_factor: f64,
    /// Value given to every action of a state seen for the first time
    pub initial_value: f64,
    pub use_counterfactual: bool,
    pub use_shaping: bool,
    /// Log progress every this many steps, `None` to stay quiet
    pub print_freq: Option<usize>,
    /// Seed for the learner's RNG, `None` to seed from the OS
    pub seed: Option<u64>,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            total_steps: 100_000,
            exploration_rate: 0.1,
            discount_factor: 0.9,
            initial_value: 2.0,
            use_counterfactual: false,
            use_shaping: false,
            print_freq: Some(10_000),
            seed: None,
        }
    }
}

impl LearnConfig {
    pub fn experience_mode(&self) -> ExperienceMode {
        if self.use_counterfactual {
            ExperienceMode::Counterfactual
        } else if self.use_shaping {
            ExperienceMode::Shaped
        } else {
            ExperienceMode::Standard
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be in [0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(Error::InvalidConfig(format!(
                "exploration rate must be in [0, 1], got {}",
                self.exploration_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return Err(Error::InvalidConfig(format!(
                "discount factor must be in [0, 1], got {}",
                self.discount_factor
            )));
        }
        if !self.initial_value.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "initial value must be finite, got {}",
                self.initial_value
            )));
        }
        if self.print_freq == Some(0) {
            return Err(Error::InvalidConfig("print frequency must be positive".into()));
        }
        Ok(())
    }

    /// Defaults overlaid with `QL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for the `QL_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse(&lookup, "QL_LEARNING_RATE")? {
            config.learning_rate = v;
        }
        if let Some(v) = parse(&lookup, "QL_TOTAL_STEPS")? {
            config.total_steps = v;
        }
        if let Some(v) = parse(&lookup, "QL_EXPLORATION_RATE")? {
            config.exploration_rate = v;
        }
        if let Some(v) = parse(&lookup, "QL_DISCOUNT")? {
            config.discount_factor = v;
        }
        if let Some(v) = parse(&lookup, "QL_INITIAL_VALUE")? {
            config.initial_value = v;
        }
        if let Some(v) = parse::<usize, _>(&lookup, "QL_PRINT_FREQ")? {
            config.print_freq = (v > 0).then_some(v);
        }
        if let Some(v) = parse(&lookup, "QL_USE_CRM")? {
            config.use_counterfactual = v;
        }
        if let Some(v) = parse(&lookup, "QL_USE_RS")? {
            config.use_shaping = v;
        }
        if let Some(v) = parse(&lookup, "QL_SEED")? {
            config.seed = Some(v);
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
        None => Ok(None),
    }
}
