pub mod config;
pub mod corridor;
pub mod counterexamples;
pub mod env;
pub mod error;
#[cfg(feature = "python")]
pub mod python;
pub mod q_table;
pub mod train;
pub mod types;

pub use config::{ExperienceMode, LearnConfig};
pub use counterexamples::{Episode, collect_counterexamples, run};
pub use env::{BatchEnvironment, BatchStep, Environment, Experience, Step, StepInfo};
pub use error::{Error, Result};
pub use q_table::QTable;
pub use train::{TrainingStats, learn, seeded_rng, train};
pub use types::{Action, State, Trace};
