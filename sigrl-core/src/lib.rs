pub mod agents;
pub mod config;
pub mod env;
pub mod env_builder;
pub mod episode;
pub mod error;
pub mod rng;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{Error, Result};
