//! Experiment configuration schema.
//!
//! Experiment files look like this:
//!
//! ```yaml
//! Agent_settings:
//!   Output_csv: output/csv
//!   Output_model: output/model
//!   Environment:
//!     Traffic_type: low
//!     Num_seconds: 1000
//!     Min_green: 10
//!     Max_green: 50
//!     Yellow_time: 4
//!     Delta_time: 5
//!   Instances:
//!     QL_run_1:
//!       Agent_type: QL
//!       Runs: 3
//!       Alpha: 0.1
//!       Gamma: 0.99
//!       Init_epsilon: 0.05
//!       Min_epsilon: 0.005
//!       Decay: 1.0
//! Plotter_settings:
//!   Output: output/plots
//!   Metrics: [system_total_stopped, system_mean_speed]
//! ```
//!
//! Everything is validated once, in [`ConfigFile::from_yaml_str`]. The rest of the crate can
//! treat an [`ExperimentConfig`] as immutable and well formed.

use crate::error::{Error, IoContext, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TrafficProfile {
    Low,
    Medium,
    High,
}

impl TrafficProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for TrafficProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::configuration(format!(
                "unrecognized traffic profile `{other}` (expected low, medium or high)"
            ))),
        }
    }
}

impl TryFrom<String> for TrafficProfile {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for TrafficProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per step metrics recorded in every telemetry artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SystemTotalStopped,
    SystemTotalWaitingTime,
    SystemMeanWaitingTime,
    SystemMeanSpeed,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::SystemTotalStopped,
        Metric::SystemTotalWaitingTime,
        Metric::SystemMeanWaitingTime,
        Metric::SystemMeanSpeed,
    ];

    /// Column name in the telemetry artifact.
    pub fn column(&self) -> &'static str {
        match self {
            Self::SystemTotalStopped => "system_total_stopped",
            Self::SystemTotalWaitingTime => "system_total_waiting_time",
            Self::SystemMeanWaitingTime => "system_mean_waiting_time",
            Self::SystemMeanSpeed => "system_mean_speed",
        }
    }
}

impl Metric {
    /// Only mean speed improves upwards; every waiting or stopping metric is minimized.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Self::SystemMeanSpeed)
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.column() == s)
            .ok_or_else(|| Error::configuration(format!("unrecognized metric `{s}`")))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// The closed set of algorithm backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    #[serde(rename = "FIXED")]
    FixedCycle,
    #[serde(rename = "QL")]
    TabularQ,
    #[serde(rename = "DQN")]
    DeepQ,
    #[serde(rename = "SARSA")]
    LinearSarsa,
    #[serde(rename = "SARSA_decay")]
    DecayingLinearSarsa,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedCycle => "FIXED",
            Self::TabularQ => "QL",
            Self::DeepQ => "DQN",
            Self::LinearSarsa => "SARSA",
            Self::DecayingLinearSarsa => "SARSA_decay",
        }
    }

    /// The fixed cycle backend runs against the fixed timing session variant.
    pub fn uses_fixed_timing(&self) -> bool {
        matches!(self, Self::FixedCycle)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Learn,
    Evaluate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(rename = "Traffic_type")]
    pub traffic_profile: TrafficProfile,
    #[serde(rename = "Gui", default)]
    pub gui: bool,
    /// Simulation horizon in seconds.
    #[serde(rename = "Num_seconds")]
    pub num_seconds: u32,
    #[serde(rename = "Min_green")]
    pub min_green: u32,
    #[serde(rename = "Max_green")]
    pub max_green: u32,
    #[serde(rename = "Yellow_time")]
    pub yellow_time: u32,
    /// Simulated seconds per environment step.
    #[serde(rename = "Delta_time")]
    pub delta_time: u32,
}

impl EnvironmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_seconds == 0 {
            return Err(Error::configuration("Num_seconds must be > 0"));
        }
        if self.min_green == 0 {
            return Err(Error::configuration("Min_green must be > 0"));
        }
        if self.max_green < self.min_green {
            return Err(Error::configuration(format!(
                "Max_green ({}) must be >= Min_green ({})",
                self.max_green, self.min_green
            )));
        }
        if self.yellow_time == 0 {
            return Err(Error::configuration("Yellow_time must be > 0"));
        }
        if self.delta_time < self.yellow_time {
            return Err(Error::configuration(format!(
                "Delta_time ({}) must be >= Yellow_time ({})",
                self.delta_time, self.yellow_time
            )));
        }
        Ok(())
    }

    /// Number of steps a session takes to reach the horizon.
    pub fn steps_per_episode(&self) -> usize {
        self.num_seconds.div_ceil(self.delta_time.max(1)) as usize
    }
}

#[derive(Debug, Clone, Copy)]
enum Range {
    /// (0, 1]
    LearningRate,
    /// [0, 1]
    Unit,
}

impl Range {
    fn check(self, key: &str, value: f64) -> Result<()> {
        let ok = match self {
            Self::LearningRate => value > 0. && value <= 1.,
            Self::Unit => (0. ..=1.).contains(&value),
        };
        if ok {
            Ok(())
        } else {
            let expected = match self {
                Self::LearningRate => "(0, 1]",
                Self::Unit => "[0, 1]",
            };
            Err(Error::configuration(format!(
                "{key} = {value} is outside {expected}"
            )))
        }
    }
}

fn check_fields(fields: &[(&str, Option<f64>, Range)], required: bool) -> Result<()> {
    for (key, value, range) in fields {
        match value {
            Some(value) => range.check(key, *value)?,
            None if required => {
                return Err(Error::configuration(format!("missing required field {key}")));
            }
            None => {}
        }
    }
    Ok(())
}

fn required<T: Copy>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::configuration(format!("missing required field {key}")))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularQParams {
    #[serde(rename = "Alpha", default)]
    pub alpha: Option<f64>,
    #[serde(rename = "Gamma", default)]
    pub gamma: Option<f64>,
    #[serde(rename = "Init_epsilon", default)]
    pub init_epsilon: Option<f64>,
    #[serde(rename = "Min_epsilon", default)]
    pub min_epsilon: Option<f64>,
    #[serde(rename = "Decay", default)]
    pub decay: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TabularQHyperparameters {
    pub alpha: f64,
    pub gamma: f64,
    pub init_epsilon: f64,
    pub min_epsilon: f64,
    pub decay: f64,
}

impl TabularQParams {
    fn check(&self, required: bool) -> Result<()> {
        check_fields(
            &[
                ("Alpha", self.alpha, Range::LearningRate),
                ("Gamma", self.gamma, Range::Unit),
                ("Init_epsilon", self.init_epsilon, Range::Unit),
                ("Min_epsilon", self.min_epsilon, Range::Unit),
                ("Decay", self.decay, Range::Unit),
            ],
            required,
        )
    }

    pub fn resolve(&self) -> Result<TabularQHyperparameters> {
        self.check(true)?;
        Ok(TabularQHyperparameters {
            alpha: required(self.alpha, "Alpha")?,
            gamma: required(self.gamma, "Gamma")?,
            init_epsilon: required(self.init_epsilon, "Init_epsilon")?,
            min_epsilon: required(self.min_epsilon, "Min_epsilon")?,
            decay: required(self.decay, "Decay")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeepQParams {
    #[serde(rename = "Alpha", default)]
    pub alpha: Option<f64>,
    #[serde(rename = "Gamma", default)]
    pub gamma: Option<f64>,
    #[serde(rename = "Init_epsilon", default)]
    pub init_epsilon: Option<f64>,
    #[serde(rename = "Final_epsilon", default)]
    pub final_epsilon: Option<f64>,
    #[serde(rename = "Exp_fraction", default)]
    pub exp_fraction: Option<f64>,
    #[serde(rename = "Batch_size", default)]
    pub batch_size: Option<usize>,
    #[serde(rename = "Buffer_size", default)]
    pub buffer_size: Option<usize>,
    #[serde(rename = "Target_update", default)]
    pub target_update: Option<usize>,
    #[serde(rename = "Hidden_layers", default)]
    pub hidden_layers: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepQHyperparameters {
    pub alpha: f64,
    pub gamma: f64,
    pub init_epsilon: f64,
    pub final_epsilon: f64,
    pub exp_fraction: f64,
    pub batch_size: usize,
    pub buffer_size: usize,
    pub target_update: usize,
    pub hidden_layers: Vec<usize>,
}

impl DeepQParams {
    pub const DEFAULT_BATCH_SIZE: usize = 32;
    pub const DEFAULT_BUFFER_SIZE: usize = 50_000;
    pub const DEFAULT_TARGET_UPDATE: usize = 100;

    fn check(&self, required: bool) -> Result<()> {
        check_fields(
            &[
                ("Alpha", self.alpha, Range::LearningRate),
                ("Gamma", self.gamma, Range::Unit),
                ("Init_epsilon", self.init_epsilon, Range::Unit),
                ("Final_epsilon", self.final_epsilon, Range::Unit),
                ("Exp_fraction", self.exp_fraction, Range::Unit),
            ],
            required,
        )?;
        for (key, value) in [
            ("Batch_size", self.batch_size),
            ("Buffer_size", self.buffer_size),
            ("Target_update", self.target_update),
        ] {
            if value == Some(0) {
                return Err(Error::configuration(format!("{key} must be > 0")));
            }
        }
        let batch_size = self.batch_size.unwrap_or(Self::DEFAULT_BATCH_SIZE);
        let buffer_size = self.buffer_size.unwrap_or(Self::DEFAULT_BUFFER_SIZE);
        if buffer_size < batch_size {
            return Err(Error::configuration(format!(
                "Buffer_size ({buffer_size}) must be >= Batch_size ({batch_size})"
            )));
        }
        if let Some(layers) = &self.hidden_layers {
            if layers.iter().any(|l| *l == 0) {
                return Err(Error::configuration("Hidden_layers entries must be > 0"));
            }
        }
        Ok(())
    }

    pub fn resolve(&self) -> Result<DeepQHyperparameters> {
        self.check(true)?;
        Ok(DeepQHyperparameters {
            alpha: required(self.alpha, "Alpha")?,
            gamma: required(self.gamma, "Gamma")?,
            init_epsilon: required(self.init_epsilon, "Init_epsilon")?,
            final_epsilon: required(self.final_epsilon, "Final_epsilon")?,
            exp_fraction: required(self.exp_fraction, "Exp_fraction")?,
            batch_size: self.batch_size.unwrap_or(Self::DEFAULT_BATCH_SIZE),
            buffer_size: self.buffer_size.unwrap_or(Self::DEFAULT_BUFFER_SIZE),
            target_update: self.target_update.unwrap_or(Self::DEFAULT_TARGET_UPDATE),
            hidden_layers: self.hidden_layers.clone().unwrap_or_else(|| vec![64, 64]),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearSarsaParams {
    #[serde(rename = "Alpha", default)]
    pub alpha: Option<f64>,
    #[serde(rename = "Gamma", default)]
    pub gamma: Option<f64>,
    #[serde(rename = "Epsilon", default)]
    pub epsilon: Option<f64>,
    #[serde(rename = "FourierOrder", default)]
    pub fourier_order: Option<usize>,
    #[serde(rename = "Lambda", default)]
    pub lambda: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearSarsaHyperparameters {
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon: f64,
    pub fourier_order: usize,
    pub lambda: f64,
}

impl LinearSarsaParams {
    fn check(&self, required: bool) -> Result<()> {
        check_fields(
            &[
                ("Alpha", self.alpha, Range::LearningRate),
                ("Gamma", self.gamma, Range::Unit),
                ("Epsilon", self.epsilon, Range::Unit),
                ("Lambda", self.lambda, Range::Unit),
            ],
            required,
        )?;
        match self.fourier_order {
            Some(0) => Err(Error::configuration("FourierOrder must be > 0")),
            None if required => Err(Error::configuration("missing required field FourierOrder")),
            _ => Ok(()),
        }
    }

    pub fn resolve(&self) -> Result<LinearSarsaHyperparameters> {
        self.check(true)?;
        Ok(LinearSarsaHyperparameters {
            alpha: required(self.alpha, "Alpha")?,
            gamma: required(self.gamma, "Gamma")?,
            epsilon: required(self.epsilon, "Epsilon")?,
            fourier_order: required(self.fourier_order, "FourierOrder")?,
            lambda: required(self.lambda, "Lambda")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayingSarsaParams {
    #[serde(flatten)]
    pub sarsa: LinearSarsaParams,
    #[serde(rename = "Decay", default)]
    pub decay: Option<f64>,
    #[serde(rename = "Min_epsilon", default)]
    pub min_epsilon: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayingSarsaHyperparameters {
    pub sarsa: LinearSarsaHyperparameters,
    pub decay: f64,
    pub min_epsilon: f64,
}

impl DecayingSarsaParams {
    pub const DEFAULT_MIN_EPSILON: f64 = 0.01;

    fn check(&self, required: bool) -> Result<()> {
        self.sarsa.check(required)?;
        check_fields(
            &[
                ("Decay", self.decay, Range::Unit),
                ("Min_epsilon", self.min_epsilon, Range::Unit),
            ],
            false,
        )?;
        if required && self.decay.is_none() {
            return Err(Error::configuration("missing required field Decay"));
        }
        Ok(())
    }

    pub fn resolve(&self) -> Result<DecayingSarsaHyperparameters> {
        self.check(true)?;
        Ok(DecayingSarsaHyperparameters {
            sarsa: self.sarsa.resolve()?,
            decay: required(self.decay, "Decay")?,
            min_epsilon: self.min_epsilon.unwrap_or(Self::DEFAULT_MIN_EPSILON),
        })
    }
}

/// Algorithm tag plus the hyperparameters that belong to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Agent_type")]
pub enum AlgorithmSpec {
    #[serde(rename = "FIXED")]
    FixedCycle,
    #[serde(rename = "QL")]
    TabularQ(TabularQParams),
    #[serde(rename = "DQN")]
    DeepQ(DeepQParams),
    #[serde(rename = "SARSA")]
    LinearSarsa(LinearSarsaParams),
    #[serde(rename = "SARSA_decay")]
    DecayingLinearSarsa(DecayingSarsaParams),
}

impl AlgorithmSpec {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::FixedCycle => AgentKind::FixedCycle,
            Self::TabularQ(_) => AgentKind::TabularQ,
            Self::DeepQ(_) => AgentKind::DeepQ,
            Self::LinearSarsa(_) => AgentKind::LinearSarsa,
            Self::DecayingLinearSarsa(_) => AgentKind::DecayingLinearSarsa,
        }
    }

    fn check(&self, required: bool) -> Result<()> {
        match self {
            Self::FixedCycle => Ok(()),
            Self::TabularQ(params) => params.check(required),
            Self::DeepQ(params) => params.check(required),
            Self::LinearSarsa(params) => params.check(required),
            Self::DecayingLinearSarsa(params) => params.check(required),
        }
    }
}

/// One configured agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Number of episodes.
    #[serde(rename = "Runs")]
    pub runs: usize,
    /// Previously saved model to restore instead of training from scratch.
    #[serde(rename = "Model", default, skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    #[serde(rename = "Mode", default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RunMode>,
    #[serde(flatten)]
    pub algorithm: AlgorithmSpec,
}

impl AgentSpec {
    pub fn new(runs: usize, algorithm: AlgorithmSpec) -> Self {
        Self {
            runs,
            model: None,
            mode: None,
            algorithm,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.algorithm.kind()
    }

    /// Whether the instance trains. Only meaningful after [`AgentSpec::validate`].
    pub fn learns(&self) -> bool {
        self.mode.unwrap_or(RunMode::Learn) == RunMode::Learn
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        let with_name = |err: Error| match err {
            Error::Configuration(msg) => Error::Configuration(format!("instance `{name}`: {msg}")),
            other => other,
        };
        validate_instance_name(name)?;
        if self.runs == 0 {
            return Err(with_name(Error::configuration("Runs must be > 0")));
        }
        if self.model.is_some() {
            if self.kind() == AgentKind::FixedCycle {
                return Err(with_name(Error::configuration(
                    "FIXED agents have no model to load",
                )));
            }
            match self.mode {
                Some(RunMode::Evaluate) => {}
                Some(RunMode::Learn) => {
                    return Err(with_name(Error::configuration(
                        "a loaded Model is evaluate-only and cannot be trained",
                    )));
                }
                None => {
                    return Err(with_name(Error::configuration(
                        "Mode must be stated explicitly (evaluate) when a Model is loaded",
                    )));
                }
            }
        }
        self.algorithm
            .check(self.model.is_none())
            .map_err(with_name)
    }
}

fn validate_instance_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.trim() != name;
    if bad {
        return Err(Error::configuration(format!(
            "instance name `{name}` cannot be used as a directory name"
        )));
    }
    Ok(())
}

/// Validated experiment description consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(rename = "Output_csv")]
    pub telemetry_root: PathBuf,
    #[serde(rename = "Output_model")]
    pub model_root: PathBuf,
    #[serde(rename = "Environment")]
    pub environment: EnvironmentConfig,
    /// Insertion order is run and report order.
    #[serde(rename = "Instances")]
    pub instances: IndexMap<String, AgentSpec>,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        self.environment.validate()?;
        if self.instances.is_empty() {
            return Err(Error::configuration("Instances must name at least one agent"));
        }
        for (name, spec) in &self.instances {
            spec.validate(name)?;
        }
        Ok(())
    }

    /// Root for this experiment's telemetry: `Output_csv/<traffic profile>`.
    pub fn telemetry_dir(&self) -> PathBuf {
        self.telemetry_root
            .join(self.environment.traffic_profile.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(rename = "Output")]
    pub output: PathBuf,
    #[serde(rename = "Metrics")]
    pub metrics: Vec<Metric>,
}

impl ReportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(Error::configuration("Plotter_settings.Metrics is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "Agent_settings")]
    pub experiment: ExperimentConfig,
    #[serde(rename = "Plotter_settings", default)]
    pub report: Option<ReportConfig>,
}

impl ConfigFile {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|err| Error::configuration(format!("bad config file format: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_path(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.experiment.validate()?;
        if let Some(report) = &self.report {
            report.validate()?;
        }
        Ok(())
    }
}
