pub mod agent;
pub mod artifact;
pub mod dqn;
pub mod exploration;
pub mod fixed_cycle;
pub mod fourier;
pub mod sarsa;
pub mod tabular;

use crate::{
    artifact::{BackendState, Hyperparameters},
    dqn::{DeepQ, FALLBACK_EPISODE_STEPS},
    fixed_cycle::FixedCycle,
    sarsa::LinearSarsa,
    tabular::TabularQ,
};
use sigrl_core::{
    agents::{Backend, Transition},
    config::AgentKind,
    env::{Action, EnvironmentDescription, Observation, Space},
    error::{Error, Result},
};

pub use agent::TrafficAgent;

pub enum BackendKind {
    FixedCycle(FixedCycle),
    TabularQ(TabularQ),
    DeepQ(DeepQ),
    LinearSarsa(LinearSarsa),
    DecayingLinearSarsa(LinearSarsa),
}

impl BackendKind {
    /// `runs` sizes schedules that span the whole training run.
    pub fn build(
        hyperparameters: &Hyperparameters,
        description: &EnvironmentDescription,
        runs: usize,
    ) -> Result<Self> {
        let Space::Discrete(actions) = description.action_space else {
            return Err(Error::configuration(
                "learning backends need a discrete action space",
            ));
        };
        let state_dims = description.observation_size();
        Ok(match hyperparameters {
            Hyperparameters::FixedCycle => Self::FixedCycle(FixedCycle),
            Hyperparameters::TabularQ(hp) => Self::TabularQ(TabularQ::new(*hp, actions)),
            Hyperparameters::DeepQ(hp) => {
                let episode_steps = description
                    .max_episode_steps
                    .unwrap_or(FALLBACK_EPISODE_STEPS);
                Self::DeepQ(DeepQ::new(
                    hp.clone(),
                    state_dims,
                    actions,
                    runs * episode_steps,
                )?)
            }
            Hyperparameters::LinearSarsa(hp) => {
                Self::LinearSarsa(LinearSarsa::new(*hp, state_dims, actions))
            }
            Hyperparameters::DecayingLinearSarsa(hp) => {
                Self::DecayingLinearSarsa(LinearSarsa::decaying(*hp, state_dims, actions))
            }
        })
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            Self::FixedCycle(_) => AgentKind::FixedCycle,
            Self::TabularQ(_) => AgentKind::TabularQ,
            Self::DeepQ(_) => AgentKind::DeepQ,
            Self::LinearSarsa(_) => AgentKind::LinearSarsa,
            Self::DecayingLinearSarsa(_) => AgentKind::DecayingLinearSarsa,
        }
    }

    pub fn state(&self) -> Result<BackendState> {
        Ok(match self {
            Self::FixedCycle(_) => BackendState::Stateless,
            Self::TabularQ(q) => BackendState::QTable(q.state()),
            Self::DeepQ(dqn) => BackendState::Network(dqn.state()?),
            Self::LinearSarsa(sarsa) | Self::DecayingLinearSarsa(sarsa) => {
                BackendState::Linear(sarsa.state())
            }
        })
    }

    pub fn restore(&mut self, state: BackendState) -> Result<()> {
        match (self, state) {
            (Self::FixedCycle(_), BackendState::Stateless) => Ok(()),
            (Self::TabularQ(q), BackendState::QTable(state)) => q.restore(state),
            (Self::DeepQ(dqn), BackendState::Network(state)) => dqn.restore(state),
            (
                Self::LinearSarsa(sarsa) | Self::DecayingLinearSarsa(sarsa),
                BackendState::Linear(state),
            ) => sarsa.restore(state),
            (backend, _) => Err(Error::Model(format!(
                "artifact state does not belong to a {} backend",
                backend.kind()
            ))),
        }
    }
}

impl Backend for BackendKind {
    fn begin_episode(&mut self, observation: &Observation) -> Result<()> {
        match self {
            Self::FixedCycle(b) => b.begin_episode(observation),
            Self::TabularQ(b) => b.begin_episode(observation),
            Self::DeepQ(b) => b.begin_episode(observation),
            Self::LinearSarsa(b) | Self::DecayingLinearSarsa(b) => b.begin_episode(observation),
        }
    }

    fn act(&mut self, observation: &Observation, explore: bool) -> Result<Action> {
        match self {
            Self::FixedCycle(b) => b.act(observation, explore),
            Self::TabularQ(b) => b.act(observation, explore),
            Self::DeepQ(b) => b.act(observation, explore),
            Self::LinearSarsa(b) | Self::DecayingLinearSarsa(b) => b.act(observation, explore),
        }
    }

    fn learn(&mut self, transition: Transition<'_>) -> Result<()> {
        match self {
            Self::FixedCycle(b) => b.learn(transition),
            Self::TabularQ(b) => b.learn(transition),
            Self::DeepQ(b) => b.learn(transition),
            Self::LinearSarsa(b) | Self::DecayingLinearSarsa(b) => b.learn(transition),
        }
    }

    fn exploration_rate(&self) -> Option<f64> {
        match self {
            Self::FixedCycle(b) => b.exploration_rate(),
            Self::TabularQ(b) => b.exploration_rate(),
            Self::DeepQ(b) => b.exploration_rate(),
            Self::LinearSarsa(b) | Self::DecayingLinearSarsa(b) => b.exploration_rate(),
        }
    }
}
