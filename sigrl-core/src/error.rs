use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the experiment engine.
///
/// `Configuration`, `State` and `Io` are never retried. The orchestrator is the
/// only layer that catches them, and only to move on to the next agent.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or incomplete configuration, or a request the configuration forbids.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Contract misuse, e.g. saving an agent that was never initialized.
    #[error("state error: {0}")]
    State(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry error: {0}")]
    Telemetry(#[from] csv::Error),

    /// Model artifact could not be encoded or decoded.
    #[error("model artifact error: {0}")]
    Model(String),

    /// The simulation session failed while stepping.
    #[error("session error: {0}")]
    Session(String),

    /// The algorithm backend failed (tensor ops, optimizer steps).
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

/// Attach a path to a bare `std::io::Error`.
pub trait IoContext<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::io(path, source))
    }
}
