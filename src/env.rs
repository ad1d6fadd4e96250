use crate::error::Result;
use crate::types::{Action, State};

/// One transition, real or counterfactual.
#[derive(Debug, Clone, PartialEq)]
pub struct Experience {
    pub state: State,
    pub action: Action,
    pub reward: f64,
    pub next_state: State,
    pub done: bool,
}

/// Extra signals an environment may attach to a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Transitions for every alternate task state ("crm-experience"), shaped when shaping is on
    pub crm_experience: Option<Vec<Experience>>,
    /// Shaped reward for the real transition ("rs-reward")
    pub rs_reward: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: State,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Step of a vectorized environment. `rewards` and `dones` hold one entry per sub-environment.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStep {
    pub observation: State,
    pub rewards: Vec<f64>,
    pub dones: Vec<bool>,
}

pub trait Environment {
    fn reset(&mut self) -> Result<State>;
    fn step(&mut self, action: Action) -> Result<Step>;
    /// Size of the discrete action space.
    fn num_actions(&self) -> usize;
}

pub trait BatchEnvironment {
    fn num_envs(&self) -> usize;
    fn reset(&mut self) -> Result<State>;
    fn step(&mut self, action: Action) -> Result<BatchStep>;
    fn num_actions(&self) -> usize;
}

impl<E: Environment> BatchEnvironment for E {
    fn num_envs(&self) -> usize {
        1
    }

    fn reset(&mut self) -> Result<State> {
        Environment::reset(self)
    }

    fn step(&mut self, action: Action) -> Result<BatchStep> {
        let step = Environment::step(self, action)?;
        Ok(BatchStep {
            observation: step.observation,
            rewards: vec![step.reward],
            dones: vec![step.done],
        })
    }

    fn num_actions(&self) -> usize {
        Environment::num_actions(self)
    }
}
