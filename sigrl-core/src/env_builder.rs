use crate::{env::Env, error::Result};

/// Which signal program a freshly built session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTiming {
    /// The agent picks the phase.
    Adaptive,
    /// Pre-timed cycle, actions are ignored.
    Fixed,
}

pub trait EnvBuilderTrait {
    type Env: Env;

    fn build_env(&self, timing: SignalTiming) -> Result<Self::Env>;
}

impl<E: Env, F> EnvBuilderTrait for F
where
    F: Fn(SignalTiming) -> Result<E>,
{
    type Env = E;

    fn build_env(&self, timing: SignalTiming) -> Result<Self::Env> {
        (self)(timing)
    }
}
