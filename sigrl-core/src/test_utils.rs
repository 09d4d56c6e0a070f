use crate::{
    env::{Action, Env, EnvironmentDescription, Observation, SessionState, SnapShot, Space},
    error::{Error, Result},
    telemetry::TelemetryRecord,
};
use std::{cell::Cell, rc::Rc};

/// Counters shared between a [`ScriptedSession`] and the test that built it, so they stay
/// readable after the session was moved into an agent.
#[derive(Debug, Clone, Default)]
pub struct SessionProbe {
    resets: Rc<Cell<usize>>,
    closes: Rc<Cell<usize>>,
    steps: Rc<Cell<usize>>,
}

impl SessionProbe {
    pub fn resets(&self) -> usize {
        self.resets.get()
    }

    pub fn closes(&self) -> usize {
        self.closes.get()
    }

    pub fn steps(&self) -> usize {
        self.steps.get()
    }
}

/// Deterministic session that truncates after `episode_len` steps.
///
/// The observation is `[step / episode_len, phase]` and the reward is `1.0` for every step.
pub struct ScriptedSession {
    episode_len: usize,
    step: usize,
    phase: usize,
    state: SessionState,
    records: Vec<TelemetryRecord>,
    probe: SessionProbe,
    fail_at_step: Option<usize>,
}

impl ScriptedSession {
    pub fn new(episode_len: usize) -> Self {
        Self {
            episode_len,
            step: 0,
            phase: 0,
            state: SessionState::Unopened,
            records: Vec::new(),
            probe: SessionProbe::default(),
            fail_at_step: None,
        }
    }

    /// Makes `step` fail with a session error once this step index is reached.
    pub fn failing_at(mut self, step: usize) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    pub fn probe(&self) -> SessionProbe {
        self.probe.clone()
    }

    pub fn resets(&self) -> usize {
        self.probe.resets()
    }

    pub fn closes(&self) -> usize {
        self.probe.closes()
    }

    fn observation(&self) -> Observation {
        Observation(vec![
            self.step as f32 / self.episode_len.max(1) as f32,
            self.phase as f32,
        ])
    }
}

impl Env for ScriptedSession {
    fn reset(&mut self, _seed: u64) -> Result<Observation> {
        if self.state == SessionState::Closed {
            return Err(Error::state("reset on a closed session"));
        }
        self.state = SessionState::Active;
        self.step = 0;
        self.phase = 0;
        self.records.clear();
        self.probe.resets.set(self.probe.resets() + 1);
        Ok(self.observation())
    }

    fn step(&mut self, action: Action) -> Result<SnapShot> {
        match self.state {
            SessionState::Active => {}
            SessionState::Unopened => return Err(Error::state("step before the first reset")),
            SessionState::Closed => return Err(Error::state("step on a closed session")),
        }
        if self.fail_at_step == Some(self.step) {
            return Err(Error::Session(format!("scripted failure at step {}", self.step)));
        }
        if let Action::Phase(phase) = action {
            self.phase = phase;
        }
        let info = TelemetryRecord {
            step: self.step,
            system_total_stopped: (self.step % 3) as f64,
            system_total_waiting_time: self.step as f64,
            system_mean_waiting_time: self.step as f64 / 2.,
            system_mean_speed: 10.,
        };
        self.records.push(info);
        self.step += 1;
        self.probe.steps.set(self.probe.steps() + 1);
        Ok(SnapShot {
            state: self.observation(),
            reward: 1.,
            terminated: false,
            truncated: self.step >= self.episode_len,
            info,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::unit_box(2), Space::Discrete(2))
            .with_max_episode_steps(self.episode_len)
    }

    fn telemetry(&self) -> &[TelemetryRecord] {
        &self.records
    }

    fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.probe.closes.set(self.probe.closes() + 1);
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.state
    }
}
