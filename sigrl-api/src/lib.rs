// orchestration, reporting and tuning on top of the agents and env crates
pub mod builder;
pub mod report;
pub mod runner;
pub mod tune;

pub use builder::AgentBuilder;
pub use report::{LastValues, NullReporter, Reporter, SummaryReporter};
pub use runner::{AgentOutcome, ExperimentReport, LAST_EPISODES_LABEL, Runner};
pub use tune::{SearchSpace, Trial, Tuner};
