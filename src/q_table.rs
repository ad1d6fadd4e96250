use fxhash::FxBuildHasher;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::env::Experience;
use crate::error::{Error, Result};
use crate::types::{Action, ActionValues, State, StateMap};

/// State -> per-action value estimates.
///
/// Rows are created lazily the first time a state is touched, filled with
/// `initial_value` for every action.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    entries: StateMap,
    num_actions: usize,
    initial_value: f64,
}

impl QTable {
    pub fn new(num_actions: usize, initial_value: f64) -> Self {
        QTable {
            entries: StateMap::with_hasher(FxBuildHasher::default()),
            num_actions,
            initial_value,
        }
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    /// Changes the value given to states seen from now on. Existing rows are untouched.
    pub fn set_initial_value(&mut self, initial_value: f64) {
        self.initial_value = initial_value;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, state: &State) -> bool {
        self.entries.contains_key(state)
    }

    pub fn get(&self, state: &State) -> Option<&[f64]> {
        self.entries.get(state).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&State, &[f64])> {
        self.entries.iter().map(|(s, v)| (s, v.as_slice()))
    }

    /// Value of `action` in `state`, reading unseen states as `initial_value`.
    pub fn value(&self, state: &State, action: Action) -> f64 {
        self.entries
            .get(state)
            .and_then(|values| values.get(action))
            .copied()
            .unwrap_or(self.initial_value)
    }

    /// Inserts a full row, e.g. when loading a model built elsewhere.
    pub fn insert(&mut self, state: State, values: ActionValues) -> Result<()> {
        if values.len() != self.num_actions {
            return Err(Error::RowWidth {
                expected: self.num_actions,
                got: values.len(),
            });
        }
        self.entries.insert(state, values);
        Ok(())
    }

    /// Row for `state`, creating it on first sight.
    pub fn entry(&mut self, state: &State) -> &mut ActionValues {
        let (n, init) = (self.num_actions, self.initial_value);
        self.entries
            .entry(state.clone())
            .or_insert_with(|| vec![init; n])
    }

    /// Max value of `state`, creating the row on first sight.
    pub fn q_max(&mut self, state: &State) -> f64 {
        max_of(self.entry(state))
    }

    /// Max value of `state` without recording it.
    pub fn max_value(&self, state: &State) -> f64 {
        match self.entries.get(state) {
            Some(values) => max_of(values),
            None => self.initial_value,
        }
    }

    /// Every action attaining the max value of `state`.
    pub fn best_actions(&self, state: &State) -> Vec<Action> {
        match self.entries.get(state) {
            Some(values) => {
                let best = max_of(values);
                (0..self.num_actions).filter(|&a| values[a] == best).collect()
            }
            None => (0..self.num_actions).collect(),
        }
    }

    /// Greedy action, ties broken uniformly at random. `None` only when there are no actions.
    pub fn best_action<R: Rng + ?Sized>(&self, state: &State, rng: &mut R) -> Option<Action> {
        self.best_actions(state).choose(rng).copied()
    }

    /// One-step bootstrapped update; returns the new estimate.
    ///
    /// Non-finite rewards are refused so that no row can turn NaN.
    pub fn update(&mut self, experience: &Experience, alpha: f64, gamma: f64) -> Result<f64> {
        if !experience.reward.is_finite() {
            return Err(Error::NonFiniteReward(experience.reward));
        }
        let action = experience.action;
        if action >= self.num_actions {
            return Err(Error::InvalidAction {
                action,
                num_actions: self.num_actions,
            });
        }

        let target = if experience.done {
            experience.reward
        } else {
            experience.reward + gamma * self.q_max(&experience.next_state)
        };
        let current_q = &mut self.entry(&experience.state)[action];
        *current_q += alpha * (target - *current_q);
        Ok(*current_q)
    }
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}
