//! True online SARSA(λ) with linear function approximation over a Fourier basis.

use crate::{
    exploration::{EpsilonGreedy, greedy},
    fourier::FourierBasis,
};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sigrl_core::{
    agents::{Backend, Transition},
    config::{DecayingSarsaHyperparameters, LinearSarsaHyperparameters},
    env::{Action, Observation},
    error::{Error, Result},
    rng,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearState {
    pub exploration: EpsilonGreedy,
    pub fourier_order: usize,
    /// One weight vector per action.
    pub weights: Vec<Vec<f64>>,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

pub struct LinearSarsa {
    hyperparameters: LinearSarsaHyperparameters,
    basis: FourierBasis,
    exploration: EpsilonGreedy,
    weights: Vec<Vec<f64>>,
    traces: Vec<Vec<f64>>,
    q_old: Option<f64>,
    /// Action already drawn for the next step while learning.
    pending: Option<usize>,
    rng: StdRng,
}

impl LinearSarsa {
    pub fn new(
        hyperparameters: LinearSarsaHyperparameters,
        state_dims: usize,
        actions: usize,
    ) -> Self {
        let exploration = EpsilonGreedy::constant(hyperparameters.epsilon);
        Self::with_exploration(hyperparameters, exploration, state_dims, actions)
    }

    /// Epsilon shrinks by `decay` after every action selection, down to `min_epsilon`.
    pub fn decaying(
        hyperparameters: DecayingSarsaHyperparameters,
        state_dims: usize,
        actions: usize,
    ) -> Self {
        let exploration = EpsilonGreedy::new(
            hyperparameters.sarsa.epsilon,
            hyperparameters.min_epsilon,
            hyperparameters.decay,
        );
        Self::with_exploration(hyperparameters.sarsa, exploration, state_dims, actions)
    }

    fn with_exploration(
        hyperparameters: LinearSarsaHyperparameters,
        exploration: EpsilonGreedy,
        state_dims: usize,
        actions: usize,
    ) -> Self {
        let basis = FourierBasis::new(state_dims, hyperparameters.fourier_order);
        let features = basis.size();
        Self {
            hyperparameters,
            basis,
            exploration,
            weights: vec![vec![0.; features]; actions],
            traces: vec![vec![0.; features]; actions],
            q_old: None,
            pending: None,
            rng: rng::fork(),
        }
    }

    pub fn basis(&self) -> &FourierBasis {
        &self.basis
    }

    fn q_values(&self, features: &[f64]) -> Vec<f64> {
        self.weights.iter().map(|w| dot(w, features)).collect()
    }

    fn reset_traces(&mut self) {
        for trace in self.traces.iter_mut() {
            trace.iter_mut().for_each(|e| *e = 0.);
        }
        self.q_old = None;
        self.pending = None;
    }

    pub fn state(&self) -> LinearState {
        LinearState {
            exploration: self.exploration,
            fourier_order: self.basis.order(),
            weights: self.weights.clone(),
        }
    }

    pub fn restore(&mut self, state: LinearState) -> Result<()> {
        let shape_matches = state.fourier_order == self.basis.order()
            && state.weights.len() == self.weights.len()
            && state.weights.iter().all(|w| w.len() == self.basis.size());
        if !shape_matches {
            return Err(Error::Model(format!(
                "linear weights do not match a fourier basis of order {} with {} actions",
                self.basis.order(),
                self.weights.len()
            )));
        }
        self.exploration = state.exploration;
        self.weights = state.weights;
        self.reset_traces();
        Ok(())
    }
}

impl Backend for LinearSarsa {
    fn begin_episode(&mut self, _observation: &Observation) -> Result<()> {
        self.reset_traces();
        Ok(())
    }

    fn act(&mut self, observation: &Observation, explore: bool) -> Result<Action> {
        let features = self.basis.features(observation);
        let values = self.q_values(&features);
        let action = if explore {
            match self.pending.take() {
                Some(action) => action,
                None => self.exploration.choose(&values, &mut self.rng),
            }
        } else {
            greedy(&values)
        };
        Ok(Action::Phase(action))
    }

    fn learn(&mut self, transition: Transition<'_>) -> Result<()> {
        let Some(action) = transition.action.phase() else {
            return Err(Error::Backend("sarsa expects a phase action".into()));
        };
        let LinearSarsaHyperparameters {
            alpha,
            gamma,
            lambda,
            ..
        } = self.hyperparameters;

        let phi = self.basis.features(transition.state);
        let next_phi = self.basis.features(transition.next_state);
        let q = dot(&self.weights[action], &phi);
        let next_values = self.q_values(&next_phi);
        let next_action = self.exploration.choose(&next_values, &mut self.rng);
        self.pending = Some(next_action);
        let next_q = if transition.terminated {
            0.
        } else {
            next_values[next_action]
        };
        let td_error = transition.reward as f64 + gamma * next_q - q;
        let q_old = self.q_old.unwrap_or(q);
        let decay = gamma * lambda;

        let scale = self.basis.learning_rate_scale();
        let dutch: f64 = self.traces[action]
            .iter()
            .zip(&phi)
            .zip(scale)
            .map(|((e, p), s)| alpha * s * e * p)
            .sum::<f64>()
            * decay;
        for (b, (trace, weights)) in self.traces.iter_mut().zip(&mut self.weights).enumerate() {
            for i in 0..trace.len() {
                let lr = alpha * scale[i];
                trace[i] *= decay;
                if b == action {
                    trace[i] += phi[i] - dutch * phi[i];
                }
                weights[i] += lr * (td_error + q - q_old) * trace[i];
                if b == action {
                    weights[i] -= lr * (q - q_old) * phi[i];
                }
            }
        }
        self.q_old = Some(next_q);

        if transition.terminated {
            self.reset_traces();
        }
        Ok(())
    }

    fn exploration_rate(&self) -> Option<f64> {
        Some(self.exploration.epsilon)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hyperparameters() -> LinearSarsaHyperparameters {
        LinearSarsaHyperparameters {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.,
            fourier_order: 2,
            lambda: 0.5,
        }
    }

    #[test]
    fn rewarded_action_becomes_greedy() {
        let mut sarsa = LinearSarsa::new(hyperparameters(), 2, 2);
        let s = Observation(vec![0.2, 0.4]);
        sarsa.begin_episode(&s).unwrap();
        for _ in 0..20 {
            sarsa
                .learn(Transition {
                    state: &s,
                    action: Action::Phase(1),
                    reward: 1.,
                    next_state: &s,
                    terminated: true,
                    truncated: false,
                })
                .unwrap();
        }
        assert_eq!(sarsa.act(&s, false).unwrap(), Action::Phase(1));
    }

    #[test]
    fn decaying_variant_floors_epsilon() {
        let mut sarsa = LinearSarsa::decaying(
            DecayingSarsaHyperparameters {
                sarsa: LinearSarsaHyperparameters {
                    epsilon: 0.5,
                    ..hyperparameters()
                },
                decay: 0.5,
                min_epsilon: 0.05,
            },
            2,
            2,
        );
        let s = Observation(vec![0.2, 0.4]);
        for _ in 0..10 {
            sarsa.act(&s, true).unwrap();
            assert!(sarsa.exploration_rate().unwrap() >= 0.05);
        }
        assert_eq!(sarsa.exploration_rate(), Some(0.05));
    }

    #[test]
    fn greedy_evaluation_keeps_epsilon() {
        let mut sarsa = LinearSarsa::decaying(
            DecayingSarsaHyperparameters {
                sarsa: LinearSarsaHyperparameters {
                    epsilon: 0.5,
                    ..hyperparameters()
                },
                decay: 0.5,
                min_epsilon: 0.05,
            },
            2,
            2,
        );
        let s = Observation(vec![0.2, 0.4]);
        sarsa.act(&s, false).unwrap();
        assert_eq!(sarsa.exploration_rate(), Some(0.5));
    }

    #[test]
    fn restore_checks_basis_order() {
        let mut sarsa = LinearSarsa::new(hyperparameters(), 2, 2);
        let mut state = sarsa.state();
        state.fourier_order = 3;
        assert!(matches!(sarsa.restore(state).unwrap_err(), Error::Model(_)));
    }
}
