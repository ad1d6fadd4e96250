use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::{ExperienceMode, LearnConfig};
use crate::env::{Environment, Experience, Step};
use crate::error::{Error, Result};
use crate::q_table::QTable;
use crate::types::{Action, State};

/// Counters from one call to [`train`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainingStats {
    pub steps: usize,
    pub episodes: usize,
}

/// Trains a Q-table on `env`, continuing from `model` when given.
///
/// The RNG is seeded from `config.seed`, or from the OS when unset.
pub fn learn<E: Environment>(
    env: &mut E,
    config: &LearnConfig,
    model: Option<QTable>,
) -> Result<QTable> {
    config.validate()?;
    let num_actions = env.num_actions();
    if num_actions == 0 {
        return Err(Error::NoActions);
    }

    let mut q_table = match model {
        Some(mut model) => {
            if model.num_actions() != num_actions {
                return Err(Error::ActionCountMismatch {
                    model: model.num_actions(),
                    environment: num_actions,
                });
            }
            model.set_initial_value(config.initial_value);
            model
        }
        None => QTable::new(num_actions, config.initial_value),
    };

    let mut rng = seeded_rng(config.seed);
    let stats = train(&mut q_table, env, config, &mut rng)?;
    debug!(
        steps = stats.steps,
        episodes = stats.episodes,
        states = q_table.len(),
        "training finished"
    );
    Ok(q_table)
}

/// Seeded RNG, or one seeded from the OS when `seed` is `None`.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Epsilon-greedy Q-learning until `config.total_steps` environment steps have been taken.
///
/// The episode in progress when the budget runs out is played to the end.
pub fn train<E, R>(
    q_table: &mut QTable,
    env: &mut E,
    config: &LearnConfig,
    rng: &mut R,
) -> Result<TrainingStats>
where
    E: Environment,
    R: Rng + ?Sized,
{
    let actions: Vec<Action> = (0..q_table.num_actions()).collect();
    let mode = config.experience_mode();

    let mut stats = TrainingStats::default();
    let mut reward_total = 0.0;

    while stats.steps < config.total_steps {
        let mut state = env.reset()?;
        q_table.entry(&state);

        loop {
            let action = if rng.random::<f64>() < config.exploration_rate {
                actions.choose(rng).copied()
            } else {
                q_table.best_action(&state, rng)
            }
            .ok_or(Error::NoActions)?;

            let step = env.step(action)?;
            q_table.entry(&step.observation);

            for experience in experiences(mode, &state, action, &step)? {
                q_table.update(&experience, config.learning_rate, config.discount_factor)?;
            }

            reward_total += step.reward;
            stats.steps += 1;
            if let Some(freq) = config.print_freq {
                if stats.steps % freq == 0 {
                    info!(
                        steps = stats.steps,
                        episodes = stats.episodes,
                        total_reward = reward_total,
                        "training progress"
                    );
                    reward_total = 0.0;
                }
            }
            if step.done {
                stats.episodes += 1;
                break;
            }
            state = step.observation;
        }
    }

    Ok(stats)
}

/// Transitions to learn from after taking `action` in `state`.
fn experiences(
    mode: ExperienceMode,
    state: &State,
    action: Action,
    step: &Step,
) -> Result<Vec<Experience>> {
    let experience = |reward: f64| Experience {
        state: state.clone(),
        action,
        reward,
        next_state: step.observation.clone(),
        done: step.done,
    };

    match mode {
        ExperienceMode::Counterfactual => step
            .info
            .crm_experience
            .clone()
            .ok_or(Error::MissingCounterfactualExperience),
        ExperienceMode::Shaped => {
            let shaped = step.info.rs_reward.ok_or(Error::MissingShapedReward)?;
            Ok(vec![experience(shaped)])
        }
        ExperienceMode::Standard => Ok(vec![experience(step.reward)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StepInfo;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// One state, `n` actions, every step ends the episode with `reward`.
    struct Bandit {
        n: usize,
        reward: f64,
        info: StepInfo,
        chosen: Vec<Action>,
    }

    impl Bandit {
        fn new(n: usize, reward: f64) -> Self {
            Bandit {
                n,
                reward,
                info: StepInfo::default(),
                chosen: Vec::new(),
            }
        }
    }

    /// Log sink shared with the test body.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn progress_lines(&self) -> Vec<String> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .filter(|line| line.contains("training progress"))
                .map(str::to_owned)
                .collect()
        }
    }

    fn learn_logged(env: &mut Bandit, cfg: &LearnConfig) -> Vec<String> {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, || learn(env, cfg, None)).unwrap();
        captured.progress_lines()
    }

    impl Environment for Bandit {
        fn reset(&mut self) -> Result<State> {
            Ok(vec![0])
        }

        fn step(&mut self, action: Action) -> Result<Step> {
            self.chosen.push(action);
            Ok(Step {
                observation: vec![1],
                reward: self.reward,
                done: true,
                info: self.info.clone(),
            })
        }

        fn num_actions(&self) -> usize {
            self.n
        }
    }

    fn config(total_steps: usize) -> LearnConfig {
        LearnConfig {
            learning_rate: 1.0,
            total_steps,
            exploration_rate: 0.0,
            print_freq: None,
            seed: Some(7),
            ..LearnConfig::default()
        }
    }

    #[test]
    fn test_single_action_converges_in_one_update() {
        let mut env = Bandit::new(1, 0.75);
        let q = learn(&mut env, &config(1), None).unwrap();
        assert_eq!(q.get(&vec![0]), Some(&[0.75][..]));
    }

    #[test]
    fn test_partial_step_size() {
        let mut env = Bandit::new(1, 1.0);
        let cfg = LearnConfig {
            learning_rate: 0.5,
            ..config(1)
        };
        let q = learn(&mut env, &cfg, None).unwrap();
        assert_eq!(q.value(&vec![0], 0), 1.5);
    }

    #[test]
    fn test_terminal_next_state_is_recorded() {
        let mut env = Bandit::new(2, 1.0);
        let q = learn(&mut env, &config(3), None).unwrap();
        assert!(q.contains(&vec![1]));
        assert_eq!(q.get(&vec![1]), Some(&[2.0, 2.0][..]));
    }

    #[test]
    fn test_stats_count_steps_and_episodes() {
        let mut env = Bandit::new(2, 0.0);
        let mut q = QTable::new(2, 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let stats = train(&mut q, &mut env, &config(5), &mut rng).unwrap();
        assert_eq!(
            stats,
            TrainingStats {
                steps: 5,
                episodes: 5
            }
        );
    }

    #[test]
    fn test_shaped_reward_replaces_raw_reward() {
        let mut env = Bandit::new(1, 1.0);
        env.info.rs_reward = Some(-3.0);
        let cfg = LearnConfig {
            use_shaping: true,
            ..config(1)
        };
        let q = learn(&mut env, &cfg, None).unwrap();
        assert_eq!(q.value(&vec![0], 0), -3.0);
    }

    #[test]
    fn test_counterfactual_experience_is_applied() {
        let mut env = Bandit::new(1, 1.0);
        env.info.crm_experience = Some(vec![
            Experience {
                state: vec![10],
                action: 0,
                reward: 5.0,
                next_state: vec![11],
                done: true,
            },
            Experience {
                state: vec![20],
                action: 0,
                reward: 0.0,
                next_state: vec![10],
                done: false,
            },
        ]);
        let cfg = LearnConfig {
            use_counterfactual: true,
            use_shaping: true,
            discount_factor: 0.5,
            ..config(1)
        };
        let q = learn(&mut env, &cfg, None).unwrap();
        // The real transition is replaced, so state [0] keeps its initial value.
        assert_eq!(q.value(&vec![0], 0), 2.0);
        assert_eq!(q.value(&vec![10], 0), 5.0);
        assert_eq!(q.value(&vec![20], 0), 2.5);
    }

    #[test]
    fn test_missing_info_keys_fail() {
        let mut env = Bandit::new(1, 1.0);
        let cfg = LearnConfig {
            use_counterfactual: true,
            ..config(1)
        };
        assert!(matches!(
            learn(&mut env, &cfg, None),
            Err(Error::MissingCounterfactualExperience)
        ));

        let cfg = LearnConfig {
            use_shaping: true,
            ..config(1)
        };
        assert!(matches!(
            learn(&mut env, &cfg, None),
            Err(Error::MissingShapedReward)
        ));
    }

    #[test]
    fn test_existing_model_is_extended() {
        let mut env = Bandit::new(2, 1.0);
        let mut model = QTable::new(2, 0.0);
        model.insert(vec![0], vec![9.0, 0.0]).unwrap();

        let q = learn(&mut env, &config(1), Some(model)).unwrap();
        // Greedy picks action 0 and overwrites it with the reward.
        assert_eq!(q.get(&vec![0]), Some(&[1.0, 0.0][..]));
        assert_eq!(q.initial_value(), 2.0);
    }

    #[test]
    fn test_model_action_count_must_match() {
        let mut env = Bandit::new(3, 1.0);
        let model = QTable::new(2, 0.0);
        assert!(matches!(
            learn(&mut env, &config(1), Some(model)),
            Err(Error::ActionCountMismatch {
                model: 2,
                environment: 3
            })
        ));
    }

    #[test]
    fn test_empty_action_space_is_rejected() {
        let mut env = Bandit::new(0, 1.0);
        assert!(matches!(
            learn(&mut env, &config(1), None),
            Err(Error::NoActions)
        ));
    }

    #[test]
    fn test_progress_is_logged_every_print_freq_steps() {
        let mut env = Bandit::new(1, 1.0);
        let cfg = LearnConfig {
            print_freq: Some(10),
            ..config(30)
        };
        let lines = learn_logged(&mut env, &cfg);

        assert_eq!(lines.len(), 3);
        // Reward restarts after each line while the episode count keeps growing.
        assert!(lines[0].contains("steps=10 episodes=9 total_reward=10.0"));
        assert!(lines[1].contains("steps=20 episodes=19 total_reward=10.0"));
        assert!(lines[2].contains("steps=30 episodes=29 total_reward=10.0"));
    }

    #[test]
    fn test_no_progress_lines_without_print_freq() {
        let mut env = Bandit::new(1, 1.0);
        let lines = learn_logged(&mut env, &config(30));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_full_exploration_tries_every_action() {
        let mut env = Bandit::new(3, 5.0);
        let mut q = QTable::new(3, 0.0);
        q.insert(vec![0], vec![10.0, 0.0, 0.0]).unwrap();
        let cfg = LearnConfig {
            exploration_rate: 1.0,
            ..config(60)
        };
        let mut rng = StdRng::seed_from_u64(21);
        train(&mut q, &mut env, &cfg, &mut rng).unwrap();

        for action in 0..3 {
            assert!(env.chosen.contains(&action), "action {action} never taken");
        }
    }

    #[test]
    fn test_no_exploration_stays_greedy() {
        let mut env = Bandit::new(3, 5.0);
        let mut q = QTable::new(3, 0.0);
        q.insert(vec![0], vec![10.0, 0.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        train(&mut q, &mut env, &config(60), &mut rng).unwrap();

        assert!(env.chosen.iter().all(|&a| a == 0));
    }

    #[test]
    fn test_nan_reward_is_reported() {
        let mut env = Bandit::new(1, f64::NAN);
        assert!(matches!(
            learn(&mut env, &config(3), None),
            Err(Error::NonFiniteReward(r)) if r.is_nan()
        ));
    }

    #[test]
    fn test_zero_learning_rate_leaves_values_alone() {
        let mut env = Bandit::new(2, 1.0);
        let cfg = LearnConfig {
            learning_rate: 0.0,
            ..config(10)
        };
        let q = learn(&mut env, &cfg, None).unwrap();
        assert_eq!(q.get(&vec![0]), Some(&[2.0, 2.0][..]));
    }
}
