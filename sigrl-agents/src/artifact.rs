use crate::{dqn::NetworkState, sarsa::LinearState, tabular::QTableState};
use serde::{Deserialize, Serialize};
use sigrl_core::{
    config::{
        AgentKind, AlgorithmSpec, DecayingSarsaHyperparameters, DeepQHyperparameters,
        LinearSarsaHyperparameters, TabularQHyperparameters,
    },
    error::{Error, IoContext, Result},
};
use std::path::{Path, PathBuf};

pub const MODEL_EXTENSION: &str = "model";

/// `root/<name>.model`
pub fn model_artifact_path(root: &Path, agent: &str) -> PathBuf {
    root.join(format!("{agent}.{MODEL_EXTENSION}"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Hyperparameters {
    FixedCycle,
    TabularQ(TabularQHyperparameters),
    DeepQ(DeepQHyperparameters),
    LinearSarsa(LinearSarsaHyperparameters),
    DecayingLinearSarsa(DecayingSarsaHyperparameters),
}

impl Hyperparameters {
    /// Fails when a required hyperparameter is missing from the configuration.
    pub fn resolve(spec: &AlgorithmSpec) -> Result<Self> {
        Ok(match spec {
            AlgorithmSpec::FixedCycle => Self::FixedCycle,
            AlgorithmSpec::TabularQ(params) => Self::TabularQ(params.resolve()?),
            AlgorithmSpec::DeepQ(params) => Self::DeepQ(params.resolve()?),
            AlgorithmSpec::LinearSarsa(params) => Self::LinearSarsa(params.resolve()?),
            AlgorithmSpec::DecayingLinearSarsa(params) => {
                Self::DecayingLinearSarsa(params.resolve()?)
            }
        })
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            Self::FixedCycle => AgentKind::FixedCycle,
            Self::TabularQ(_) => AgentKind::TabularQ,
            Self::DeepQ(_) => AgentKind::DeepQ,
            Self::LinearSarsa(_) => AgentKind::LinearSarsa,
            Self::DecayingLinearSarsa(_) => AgentKind::DecayingLinearSarsa,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendState {
    Stateless,
    QTable(QTableState),
    Linear(LinearState),
    Network(NetworkState),
}

/// Everything needed to rebuild a trained backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub kind: AgentKind,
    pub hyperparameters: Hyperparameters,
    pub state: BackendState,
}

impl ModelArtifact {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|err| Error::Model(format!("encode: {err}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (artifact, _): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|err| Error::Model(format!("decode: {err}")))?;
        if artifact.kind != artifact.hyperparameters.kind() {
            return Err(Error::Model(format!(
                "artifact tagged {} carries {} hyperparameters",
                artifact.kind,
                artifact.hyperparameters.kind()
            )));
        }
        Ok(artifact)
    }

    /// Fails with a configuration error when the artifact at `origin` was saved by a different
    /// kind of agent than `instance` is configured as.
    pub fn expect_kind(&self, kind: AgentKind, instance: &str, origin: &Path) -> Result<()> {
        if self.kind == kind {
            return Ok(());
        }
        Err(Error::configuration(format!(
            "model {} holds a {} agent, instance `{instance}` is {kind}",
            origin.display(),
            self.kind
        )))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        std::fs::write(path, bytes).with_path(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_path(path)?;
        Self::decode(&bytes)
    }
}
