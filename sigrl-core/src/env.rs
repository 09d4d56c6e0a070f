use crate::{
    error::Result,
    telemetry::{self, TelemetryRecord},
};
use derive_more::{Deref, From, Into};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    Continuous { min: f32, max: f32, size: usize },
}

impl Space {
    pub fn unit_box(size: usize) -> Self {
        Self::Continuous {
            min: 0.,
            max: 1.,
            size,
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Continuous { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
    /// Steps until the session truncates. Informational, the session enforces it.
    pub max_episode_steps: Option<usize>,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
            max_episode_steps: None,
        }
    }

    pub fn with_max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deref, From, Into)]
pub struct Observation(pub Vec<f32>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Request the green phase with this index.
    Phase(usize),
    /// Leave the signal program alone.
    Hold,
}

impl Action {
    pub fn phase(&self) -> Option<usize> {
        match self {
            Self::Phase(phase) => Some(*phase),
            Self::Hold => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapShot {
    pub state: Observation,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: TelemetryRecord,
}

impl SnapShot {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Active,
    Closed,
}

/// A stateful simulation handle.
///
/// `reset` starts a new episode and clears the recorded telemetry. `close` is terminal: after it
/// both `reset` and `step` fail with a state error, as does `step` before the first `reset`.
pub trait Env {
    fn reset(&mut self, seed: u64) -> Result<Observation>;
    fn step(&mut self, action: Action) -> Result<SnapShot>;
    fn env_description(&self) -> EnvironmentDescription;
    /// Rows recorded since the last reset.
    fn telemetry(&self) -> &[TelemetryRecord];
    fn close(&mut self) -> Result<()>;
    fn state(&self) -> SessionState;

    fn save_telemetry(&self, path: &Path) -> Result<()> {
        telemetry::write_records(path, self.telemetry())
    }
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn reset(&mut self, seed: u64) -> Result<Observation> {
        (**self).reset(seed)
    }

    fn step(&mut self, action: Action) -> Result<SnapShot> {
        (**self).step(action)
    }

    fn env_description(&self) -> EnvironmentDescription {
        (**self).env_description()
    }

    fn telemetry(&self) -> &[TelemetryRecord] {
        (**self).telemetry()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn state(&self) -> SessionState {
        (**self).state()
    }

    fn save_telemetry(&self, path: &Path) -> Result<()> {
        (**self).save_telemetry(path)
    }
}
