//! Tabular Q-learning over a binned observation.

use crate::exploration::{EpsilonGreedy, greedy};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sigrl_core::{
    agents::{Backend, Transition},
    config::TabularQHyperparameters,
    env::{Action, Observation},
    error::{Error, Result},
    rng,
};
use std::collections::BTreeMap;

pub const NUM_BINS: u8 = 10;

/// Bins every component of a unit box observation into `NUM_BINS` buckets.
pub fn state_key(observation: &Observation) -> Vec<u8> {
    observation
        .iter()
        .map(|v| {
            let bin = (v.clamp(0., 1.) * NUM_BINS as f32).floor() as u8;
            bin.min(NUM_BINS - 1)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableState {
    pub exploration: EpsilonGreedy,
    pub table: BTreeMap<Vec<u8>, Vec<f64>>,
}

pub struct TabularQ {
    hyperparameters: TabularQHyperparameters,
    actions: usize,
    exploration: EpsilonGreedy,
    table: BTreeMap<Vec<u8>, Vec<f64>>,
    rng: StdRng,
}

impl TabularQ {
    pub fn new(hyperparameters: TabularQHyperparameters, actions: usize) -> Self {
        Self {
            exploration: EpsilonGreedy::new(
                hyperparameters.init_epsilon,
                hyperparameters.min_epsilon,
                hyperparameters.decay,
            ),
            hyperparameters,
            actions,
            table: BTreeMap::new(),
            rng: rng::fork(),
        }
    }

    pub fn hyperparameters(&self) -> &TabularQHyperparameters {
        &self.hyperparameters
    }

    pub fn states_seen(&self) -> usize {
        self.table.len()
    }

    fn values(&mut self, key: Vec<u8>) -> &mut Vec<f64> {
        let actions = self.actions;
        self.table.entry(key).or_insert_with(|| vec![0.; actions])
    }

    pub fn state(&self) -> QTableState {
        QTableState {
            exploration: self.exploration,
            table: self.table.clone(),
        }
    }

    pub fn restore(&mut self, state: QTableState) -> Result<()> {
        if let Some(values) = state.table.values().find(|v| v.len() != self.actions) {
            return Err(Error::Model(format!(
                "q-table rows have {} actions, the session has {}",
                values.len(),
                self.actions
            )));
        }
        self.exploration = state.exploration;
        self.table = state.table;
        Ok(())
    }
}

impl Backend for TabularQ {
    fn act(&mut self, observation: &Observation, explore: bool) -> Result<Action> {
        let key = state_key(observation);
        let action = if explore {
            let values = self.values(key).clone();
            self.exploration.choose(&values, &mut self.rng)
        } else {
            self.table.get(&key).map(|v| greedy(v)).unwrap_or(0)
        };
        Ok(Action::Phase(action))
    }

    fn learn(&mut self, transition: Transition<'_>) -> Result<()> {
        let Some(action) = transition.action.phase() else {
            return Err(Error::Backend("q-learning expects a phase action".into()));
        };
        let TabularQHyperparameters { alpha, gamma, .. } = self.hyperparameters;
        let next_best = self
            .values(state_key(transition.next_state))
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let values = self.values(state_key(transition.state));
        let target = transition.reward as f64 + gamma * next_best;
        values[action] += alpha * (target - values[action]);
        Ok(())
    }

    fn exploration_rate(&self) -> Option<f64> {
        Some(self.exploration.epsilon)
    }
}
