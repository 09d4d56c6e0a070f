use pyo3::{
    Bound, PyAny, PyErr, PyObject, PyResult, Python,
    types::{PyAnyMethods, PyDict, PyDictMethods},
};
use sigrl_core::{
    config::{EnvironmentConfig, Metric},
    env::{Action, Env, EnvironmentDescription, Observation, SessionState, SnapShot, Space},
    env_builder::SignalTiming,
    error::{Error, Result},
    telemetry::TelemetryRecord,
};
use tracing::debug;

use crate::route_file;

pub const NET_FILE: &str = "big-intersection/BI.net.xml";

fn session_err(err: PyErr) -> Error {
    Error::Session(format!("sumo: {err}"))
}

/// A `sumo_rl.SumoEnvironment` in single agent mode.
pub struct SumoEnv {
    env: PyObject,
    action_space: Space,
    observation_space: Space,
    max_episode_steps: usize,
    fixed: bool,
    state: SessionState,
    step: usize,
    records: Vec<TelemetryRecord>,
}

impl SumoEnv {
    pub fn new(config: &EnvironmentConfig, timing: SignalTiming) -> Result<Self> {
        config.validate()?;
        let fixed = timing == SignalTiming::Fixed;
        Python::with_gil(|py| {
            let sumo_rl = py.import("sumo_rl")?;
            let kwargs = PyDict::new(py);
            kwargs.set_item("net_file", NET_FILE)?;
            kwargs.set_item("route_file", route_file(config.traffic_profile))?;
            kwargs.set_item("use_gui", config.gui)?;
            kwargs.set_item("num_seconds", config.num_seconds)?;
            kwargs.set_item("delta_time", config.delta_time)?;
            kwargs.set_item("yellow_time", config.yellow_time)?;
            kwargs.set_item("min_green", config.min_green)?;
            kwargs.set_item("max_green", config.max_green)?;
            kwargs.set_item("fixed_ts", fixed)?;
            kwargs.set_item("add_per_agent_info", false)?;
            kwargs.set_item("sumo_warnings", false)?;
            kwargs.set_item("single_agent", true)?;
            let env = sumo_rl
                .getattr("SumoEnvironment")?
                .call((), Some(&kwargs))?;
            let actions: usize = env.getattr("action_space")?.getattr("n")?.extract()?;
            let shape: Vec<usize> = env
                .getattr("observation_space")?
                .getattr("shape")?
                .extract()?;
            PyResult::Ok(SumoEnv {
                env: env.into(),
                action_space: Space::Discrete(actions),
                observation_space: Space::unit_box(shape.iter().product()),
                max_episode_steps: config.num_seconds.div_ceil(config.delta_time) as usize,
                fixed,
                state: SessionState::Unopened,
                step: 0,
                records: Vec::new(),
            })
        })
        .map_err(session_err)
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Unopened => Err(Error::state("step on a sumo session that was never reset")),
            SessionState::Closed => Err(Error::state("step on a closed sumo session")),
        }
    }
}

fn record_from_info(step: usize, info: &Bound<'_, PyAny>) -> PyResult<TelemetryRecord> {
    let info = info.downcast::<PyDict>()?;
    let metric = |metric: Metric| -> PyResult<f64> {
        match info.get_item(metric.column())? {
            Some(value) => value.extract(),
            None => Ok(0.),
        }
    };
    Ok(TelemetryRecord {
        step,
        system_total_stopped: metric(Metric::SystemTotalStopped)?,
        system_total_waiting_time: metric(Metric::SystemTotalWaitingTime)?,
        system_mean_waiting_time: metric(Metric::SystemMeanWaitingTime)?,
        system_mean_speed: metric(Metric::SystemMeanSpeed)?,
    })
}

impl Env for SumoEnv {
    fn reset(&mut self, seed: u64) -> Result<Observation> {
        if self.state == SessionState::Closed {
            return Err(Error::state("reset on a closed sumo session"));
        }
        let state: Vec<f32> = Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            // sumo takes a 32 bit seed
            kwargs.set_item("seed", seed as u32)?;
            let reset = self.env.call_method(py, "reset", (), Some(&kwargs))?;
            reset.bind(py).get_item(0)?.extract()
        })
        .map_err(session_err)?;
        self.state = SessionState::Active;
        self.step = 0;
        self.records.clear();
        Ok(Observation(state))
    }

    fn step(&mut self, action: Action) -> Result<SnapShot> {
        self.check_active()?;
        let step = self.step;
        let (state, reward, terminated, truncated, info) = Python::with_gil(|py| {
            let result = match action.phase() {
                Some(phase) if !self.fixed => self.env.call_method1(py, "step", (phase,))?,
                _ => self.env.call_method1(py, "step", (py.None(),))?,
            };
            let result = result.bind(py);
            let state: Vec<f32> = result.get_item(0)?.extract()?;
            let reward: f32 = result.get_item(1)?.extract()?;
            let terminated: bool = result.get_item(2)?.extract()?;
            let truncated: bool = result.get_item(3)?.extract()?;
            let info = record_from_info(step, &result.get_item(4)?)?;
            PyResult::Ok((state, reward, terminated, truncated, info))
        })
        .map_err(session_err)?;
        self.records.push(info);
        self.step += 1;
        Ok(SnapShot {
            state: Observation(state),
            reward,
            terminated,
            truncated,
            info,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(self.observation_space.clone(), self.action_space.clone())
            .with_max_episode_steps(self.max_episode_steps)
    }

    fn telemetry(&self) -> &[TelemetryRecord] {
        &self.records
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        debug!("closing sumo session");
        Python::with_gil(|py| self.env.call_method0(py, "close").map(|_| ())).map_err(session_err)
    }

    fn state(&self) -> SessionState {
        self.state
    }
}
