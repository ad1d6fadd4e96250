use rand::Rng;
use tracing::{debug, info};

use crate::env::{BatchEnvironment, Environment};
use crate::error::{Error, Result};
use crate::q_table::QTable;
use crate::types::Trace;

/// A greedy rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub trace: Trace,
    pub total_reward: f64,
    /// False when the rollout was cut off by `max_steps`
    pub done: bool,
}

/// Plays one episode greedily under `model`, for at most `max_steps` steps.
pub fn run<E, R>(model: &QTable, env: &mut E, max_steps: usize, rng: &mut R) -> Result<Episode>
where
    E: Environment,
    R: Rng + ?Sized,
{
    let mut state = Environment::reset(env)?;
    let mut episode = Episode {
        trace: Vec::new(),
        total_reward: 0.0,
        done: false,
    };

    for _ in 0..max_steps {
        let action = model.best_action(&state, rng).ok_or(Error::NoActions)?;
        episode.trace.push((state, action));
        let step = Environment::step(env, action)?;
        episode.total_reward += step.reward;
        if step.done {
            episode.done = true;
            break;
        }
        state = step.observation;
    }
    Ok(episode)
}

/// Runs `iterations` greedy episodes and keeps the traces that earned nothing.
///
/// An episode ends as soon as any sub-environment is done. It is kept unless one
/// of the finished sub-environments accumulated a positive reward.
pub fn collect_counterexamples<E, R>(
    model: &QTable,
    env: &mut E,
    iterations: usize,
    rng: &mut R,
) -> Result<Vec<Trace>>
where
    E: BatchEnvironment,
    R: Rng + ?Sized,
{
    info!("Running trained model to collect counterexamples");
    let mut counterexamples = Vec::new();

    for sample in 0..iterations {
        let mut episode_rew = vec![0.0; env.num_envs()];
        let mut trace = Trace::new();
        let mut state = BatchEnvironment::reset(env)?;

        loop {
            let action = model.best_action(&state, rng).ok_or(Error::NoActions)?;
            trace.push((state, action));
            let step = BatchEnvironment::step(env, action)?;
            if step.rewards.len() != episode_rew.len() || step.dones.len() != episode_rew.len() {
                return Err(Error::environment(format!(
                    "expected {} sub-environments, got {} rewards and {} dones",
                    episode_rew.len(),
                    step.rewards.len(),
                    step.dones.len()
                )));
            }
            for (total, rew) in episode_rew.iter_mut().zip(&step.rewards) {
                *total += rew;
            }

            if step.dones.iter().any(|&d| d) {
                let positive_example = step
                    .dones
                    .iter()
                    .zip(&episode_rew)
                    .any(|(&done, &rew)| done && rew > 0.0);
                if !positive_example {
                    debug!(sample, len = trace.len(), "counterexample found");
                    counterexamples.push(trace);
                }
                break;
            }
            state = step.observation;
        }
    }

    info!(
        found = counterexamples.len(),
        "Counterexample search process completed."
    );
    Ok(counterexamples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{BatchStep, Step, StepInfo};
    use crate::types::{Action, State};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Action 1 wins (+1), action 0 loses (0); one step per episode.
    struct Coin;

    impl Environment for Coin {
        fn reset(&mut self) -> Result<State> {
            Ok(vec![0])
        }

        fn step(&mut self, action: Action) -> Result<Step> {
            Ok(Step {
                observation: vec![1],
                reward: action as f64,
                done: true,
                info: StepInfo::default(),
            })
        }

        fn num_actions(&self) -> usize {
            2
        }
    }

    /// Two sub-environments with fixed rewards; only the second one finishes.
    struct Pair {
        rewards: [f64; 2],
    }

    impl BatchEnvironment for Pair {
        fn num_envs(&self) -> usize {
            2
        }

        fn reset(&mut self) -> Result<State> {
            Ok(vec![0, 0])
        }

        fn step(&mut self, _action: Action) -> Result<BatchStep> {
            Ok(BatchStep {
                observation: vec![1, 1],
                rewards: self.rewards.to_vec(),
                dones: vec![false, true],
            })
        }

        fn num_actions(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_only_non_positive_episodes_are_kept() {
        // Untrained model: ties everywhere, so both outcomes show up.
        let model = QTable::new(2, 2.0);
        let mut rng = StdRng::seed_from_u64(5);
        let traces = collect_counterexamples(&model, &mut Coin, 100, &mut rng).unwrap();

        assert!(!traces.is_empty());
        assert!(traces.len() < 100);
        for trace in &traces {
            assert_eq!(trace, &vec![(vec![0], 0)]);
        }
    }

    #[test]
    fn test_trained_winner_yields_no_counterexamples() {
        let mut model = QTable::new(2, 0.0);
        model.insert(vec![0], vec![0.0, 1.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let traces = collect_counterexamples(&model, &mut Coin, 20, &mut rng).unwrap();
        assert!(traces.is_empty());
    }

    #[test]
    fn test_only_finished_sub_environments_count() {
        let model = QTable::new(1, 0.0);
        let mut rng = StdRng::seed_from_u64(5);

        // Positive reward in the unfinished env does not save the episode.
        let mut env = Pair { rewards: [1.0, 0.0] };
        let traces = collect_counterexamples(&model, &mut env, 3, &mut rng).unwrap();
        assert_eq!(traces.len(), 3);

        let mut env = Pair { rewards: [0.0, 1.0] };
        let traces = collect_counterexamples(&model, &mut env, 3, &mut rng).unwrap();
        assert!(traces.is_empty());
    }

    #[test]
    fn test_run_follows_greedy_policy() {
        let mut model = QTable::new(2, 0.0);
        model.insert(vec![0], vec![0.0, 1.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let episode = run(&model, &mut Coin, 10, &mut rng).unwrap();
        assert_eq!(episode.trace, vec![(vec![0], 1)]);
        assert_eq!(episode.total_reward, 1.0);
        assert!(episode.done);
    }
}
