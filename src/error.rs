use thiserror::Error;

use crate::types::Action;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Environment error: {0}")]
    Environment(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("counterfactual experience requested but the step info has none")]
    MissingCounterfactualExperience,
    #[error("reward shaping requested but the step info has no shaped reward")]
    MissingShapedReward,
    #[error("action {action} out of range for {num_actions} actions")]
    InvalidAction { action: Action, num_actions: usize },
    #[error("model has {model} actions but the environment has {environment}")]
    ActionCountMismatch { model: usize, environment: usize },
    #[error("row has {got} values but the table has {expected} actions")]
    RowWidth { expected: usize, got: usize },
    #[error("non-finite reward {0}")]
    NonFiniteReward(f64),
    #[error("environment has no actions")]
    NoActions,
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn environment<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Environment(err.into())
    }
}
