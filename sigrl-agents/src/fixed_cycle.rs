use sigrl_core::{
    agents::{Backend, Transition},
    env::{Action, Observation},
    error::Result,
};

/// Leaves the signal to its pre-timed program.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedCycle;

impl Backend for FixedCycle {
    fn act(&mut self, _observation: &Observation, _explore: bool) -> Result<Action> {
        Ok(Action::Hold)
    }

    fn learn(&mut self, _transition: Transition<'_>) -> Result<()> {
        Ok(())
    }
}
