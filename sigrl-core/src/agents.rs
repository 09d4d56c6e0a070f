use crate::{
    env::{Action, Env, Observation},
    error::Result,
};
use std::path::{Path, PathBuf};

/// One environment transition handed to [`Backend::learn`].
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub state: &'a Observation,
    pub action: Action,
    pub reward: f32,
    pub next_state: &'a Observation,
    pub terminated: bool,
    pub truncated: bool,
}

/// Decision making and parameter updates of one algorithm family.
pub trait Backend {
    /// Called after every session reset, before the first `act` of the episode.
    fn begin_episode(&mut self, _observation: &Observation) -> Result<()> {
        Ok(())
    }

    /// `explore = false` is greedy evaluation and must leave exploration state untouched.
    fn act(&mut self, observation: &Observation, explore: bool) -> Result<Action>;

    fn learn(&mut self, transition: Transition<'_>) -> Result<()>;

    /// Current exploration rate, for backends that have one.
    fn exploration_rate(&self) -> Option<f64> {
        None
    }
}

/// Lifecycle contract shared by every agent kind.
///
/// An agent is created with its session bound. `run` consumes the session: it is closed when
/// `run` returns, successfully or not.
pub trait Agent {
    type Session: Env;

    fn name(&self) -> &str;

    /// Builds the backend. No-op when it already exists.
    fn initialize(&mut self) -> Result<()>;

    /// Runs every configured episode and returns the directory holding the telemetry artifacts.
    fn run(&mut self, learn: bool, output_root: &Path) -> Result<PathBuf>;

    /// Fails with a state error before [`Agent::initialize`].
    fn save(&self, path: &Path) -> Result<()>;

    /// Replaces the backend with the one saved at `path`, closes the previously bound session,
    /// binds `session` and makes the agent evaluate-only.
    ///
    /// Fails with a state error before [`Agent::initialize`]. `session` is closed whenever the
    /// call fails.
    fn load(&mut self, path: &Path, session: Self::Session) -> Result<()>;
}
