//! Two-stage corridor task: walk to the far end, then back to the start.
//!
//! The task stage is tracked by a tiny automaton, which lets every step report
//! what would have happened from the other stages too.

use crate::env::{Environment, Experience, Step, StepInfo};
use crate::error::{Error, Result};
use crate::types::{Action, State};

pub const LEFT: Action = 0;
pub const RIGHT: Action = 1;

const STAGES: usize = 2;
const DONE: usize = STAGES;

#[derive(Debug, Clone)]
pub struct CorridorConfig {
    /// Number of cells
    pub length: usize,
    /// Steps before the episode is cut off with no reward
    pub horizon: usize,
    /// Shape the counterfactual rewards as well as `rs_reward`
    pub shaping: bool,
    /// Discount used by the shaping potential
    pub shaping_gamma: f64,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            length: 5,
            horizon: 50,
            shaping: false,
            shaping_gamma: 0.9,
        }
    }
}

pub struct Corridor {
    pub config: CorridorConfig,
    position: usize,
    stage: usize,
    current_step: usize,
}

impl Corridor {
    pub fn new(config: CorridorConfig) -> Self {
        Corridor {
            config,
            position: 0,
            stage: 0,
            current_step: 0,
        }
    }

    pub fn get_hash_key(&self) -> State {
        key(self.position, self.stage)
    }

    /// Stage after reaching `position` from `stage`, and the reward for it.
    fn advance(&self, stage: usize, position: usize) -> (usize, f64) {
        match stage {
            0 if position == self.config.length - 1 => (1, 0.0),
            1 if position == 0 => (DONE, 1.0),
            _ => (stage, 0.0),
        }
    }

    fn check_length(&self) -> Result<()> {
        if self.config.length < 2 {
            return Err(Error::environment("corridor needs at least two cells"));
        }
        Ok(())
    }

    fn potential(stage: usize) -> f64 {
        match stage {
            1 => 0.5,
            _ => 0.0,
        }
    }

    fn shaped(&self, stage: usize, next_stage: usize, reward: f64) -> f64 {
        reward + self.config.shaping_gamma * Self::potential(next_stage) - Self::potential(stage)
    }
}

fn key(position: usize, stage: usize) -> State {
    vec![position as i64, stage as i64]
}

impl Environment for Corridor {
    fn reset(&mut self) -> Result<State> {
        self.check_length()?;
        self.position = 0;
        self.stage = 0;
        self.current_step = 0;
        Ok(self.get_hash_key())
    }

    fn step(&mut self, action: Action) -> Result<Step> {
        self.check_length()?;
        let next_position = match action {
            LEFT => self.position.saturating_sub(1),
            RIGHT => (self.position + 1).min(self.config.length - 1),
            _ => {
                return Err(Error::InvalidAction {
                    action,
                    num_actions: 2,
                });
            }
        };
        self.current_step += 1;
        let timed_out = self.current_step >= self.config.horizon;

        let crm_experience: Vec<Experience> = (0..STAGES)
            .map(|stage| {
                let (next_stage, reward) = self.advance(stage, next_position);
                Experience {
                    state: key(self.position, stage),
                    action,
                    reward: if self.config.shaping {
                        self.shaped(stage, next_stage, reward)
                    } else {
                        reward
                    },
                    next_state: key(next_position, next_stage),
                    done: next_stage == DONE || timed_out,
                }
            })
            .collect();

        let (next_stage, reward) = self.advance(self.stage, next_position);
        let rs_reward = self.shaped(self.stage, next_stage, reward);

        self.position = next_position;
        self.stage = next_stage;

        Ok(Step {
            observation: self.get_hash_key(),
            reward,
            done: next_stage == DONE || timed_out,
            info: StepInfo {
                crm_experience: Some(crm_experience),
                rs_reward: Some(rs_reward),
            },
        })
    }

    fn num_actions(&self) -> usize {
        2
    }
}
