pub mod network;
pub mod optimizer;
pub mod replay;

use crate::exploration::{LinearSchedule, greedy};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};
use network::{QNetwork, copy_varmap, load_varmap, serialize_varmap};
use optimizer::OptimizerWithMaxGrad;
use rand::{Rng, rngs::StdRng};
use replay::{Experience, ReplayBuffer};
use serde::{Deserialize, Serialize};
use sigrl_core::{
    agents::{Backend, Transition},
    config::DeepQHyperparameters,
    env::{Action, Observation},
    error::{Error, Result},
    rng,
};
use tracing::trace;

pub const MAX_GRAD_NORM: f32 = 10.;
/// Planned episode length when the session does not announce one.
pub const FALLBACK_EPISODE_STEPS: usize = 1000;

fn backend_err(err: candle_core::Error) -> Error {
    Error::Backend(err.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub learn_steps: usize,
    /// safetensors buffer of the online network.
    pub weights: Vec<u8>,
}

pub fn device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            return device;
        }
    }
    Device::Cpu
}

pub struct DeepQ {
    hyperparameters: DeepQHyperparameters,
    actions: usize,
    device: Device,
    q_varmap: VarMap,
    q_net: QNetwork,
    target_varmap: VarMap,
    target_net: QNetwork,
    optimizer: OptimizerWithMaxGrad,
    replay: ReplayBuffer,
    schedule: LinearSchedule,
    learn_steps: usize,
    epsilon: f64,
    rng: StdRng,
}

impl DeepQ {
    pub fn new(
        hyperparameters: DeepQHyperparameters,
        state_dims: usize,
        actions: usize,
        planned_steps: usize,
    ) -> Result<Self> {
        Self::build(hyperparameters, state_dims, actions, planned_steps).map_err(backend_err)
    }

    fn build(
        hyperparameters: DeepQHyperparameters,
        state_dims: usize,
        actions: usize,
        planned_steps: usize,
    ) -> candle_core::Result<Self> {
        let device = device();
        let mut layers = hyperparameters.hidden_layers.clone();
        layers.push(actions);

        let q_varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&q_varmap, DType::F32, &device);
        let q_net = QNetwork::build(state_dims, &layers, &vb, "q")?;
        let target_varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&target_varmap, DType::F32, &device);
        let target_net = QNetwork::build(state_dims, &layers, &vb, "q")?;
        copy_varmap(&q_varmap, &target_varmap)?;

        let optimizer = OptimizerWithMaxGrad::adam(
            q_varmap.clone(),
            hyperparameters.alpha,
            Some(MAX_GRAD_NORM),
        )?;
        let schedule = LinearSchedule {
            start: hyperparameters.init_epsilon,
            end: hyperparameters.final_epsilon,
            fraction: hyperparameters.exp_fraction,
            total_steps: planned_steps,
        };
        Ok(Self {
            replay: ReplayBuffer::new(hyperparameters.buffer_size),
            epsilon: schedule.value(0),
            hyperparameters,
            actions,
            device,
            q_varmap,
            q_net,
            target_varmap,
            target_net,
            optimizer,
            schedule,
            learn_steps: 0,
            rng: rng::fork(),
        })
    }

    pub fn learn_steps(&self) -> usize {
        self.learn_steps
    }

    fn q_values(&self, observation: &[f32]) -> candle_core::Result<Vec<f64>> {
        let xs = Tensor::from_slice(observation, (1, observation.len()), &self.device)?;
        let values = self.q_net.forward(&xs)?.squeeze(0)?.to_vec1::<f32>()?;
        Ok(values.into_iter().map(f64::from).collect())
    }

    fn train_step(&mut self) -> candle_core::Result<()> {
        let batch_size = self.hyperparameters.batch_size;
        let batch = self.replay.sample(batch_size, &mut self.rng);
        let state_dims = batch[0].state.len();

        let states: Vec<f32> = batch.iter().flat_map(|e| e.state.iter().copied()).collect();
        let next_states: Vec<f32> = batch
            .iter()
            .flat_map(|e| e.next_state.iter().copied())
            .collect();
        let actions: Vec<u32> = batch.iter().map(|e| e.action).collect();

        let next_states = Tensor::from_vec(next_states, (batch_size, state_dims), &self.device)?;
        let next_max = self
            .target_net
            .forward(&next_states)?
            .max(1)?
            .detach()
            .to_vec1::<f32>()?;
        let gamma = self.hyperparameters.gamma as f32;
        let targets: Vec<f32> = batch
            .iter()
            .zip(next_max)
            .map(|(e, next)| {
                let bootstrap = if e.terminated { 0. } else { gamma * next };
                e.reward + bootstrap
            })
            .collect();

        let states = Tensor::from_vec(states, (batch_size, state_dims), &self.device)?;
        let actions = Tensor::from_vec(actions, (batch_size, 1), &self.device)?;
        let targets = Tensor::from_vec(targets, batch_size, &self.device)?;
        let q = self.q_net.forward(&states)?.gather(&actions, 1)?.squeeze(1)?;

        // huber, delta = 1
        let abs = q.sub(&targets)?.abs()?;
        let quadratic = abs.minimum(1f64)?;
        let linear = abs.sub(&quadratic)?;
        let loss = ((quadratic.sqr()? * 0.5)? + linear)?.mean_all()?;
        self.optimizer.backward_step(&loss)?;
        let loss = loss.to_scalar::<f32>()?;
        trace!(loss, step = self.learn_steps, "dqn train step");
        Ok(())
    }

    pub fn state(&self) -> Result<NetworkState> {
        Ok(NetworkState {
            learn_steps: self.learn_steps,
            weights: serialize_varmap(&self.q_varmap).map_err(backend_err)?,
        })
    }

    pub fn restore(&mut self, state: NetworkState) -> Result<()> {
        load_varmap(&self.q_varmap, &state.weights, &self.device)
            .and_then(|_| copy_varmap(&self.q_varmap, &self.target_varmap))
            .map_err(|err| Error::Model(format!("dqn weights: {err}")))?;
        self.learn_steps = state.learn_steps;
        self.epsilon = self.schedule.value(self.learn_steps);
        Ok(())
    }
}

impl Backend for DeepQ {
    fn act(&mut self, observation: &Observation, explore: bool) -> Result<Action> {
        if explore && self.rng.random::<f64>() < self.epsilon {
            return Ok(Action::Phase(self.rng.random_range(0..self.actions)));
        }
        let values = self.q_values(observation).map_err(backend_err)?;
        Ok(Action::Phase(greedy(&values)))
    }

    fn learn(&mut self, transition: Transition<'_>) -> Result<()> {
        let Some(action) = transition.action.phase() else {
            return Err(Error::Backend("dqn expects a phase action".into()));
        };
        self.replay.add(Experience {
            state: transition.state.to_vec(),
            action: action as u32,
            reward: transition.reward,
            next_state: transition.next_state.to_vec(),
            terminated: transition.terminated,
        });
        self.learn_steps += 1;
        self.epsilon = self.schedule.value(self.learn_steps);
        if self.replay.len() >= self.hyperparameters.batch_size {
            self.train_step().map_err(backend_err)?;
        }
        if self.learn_steps % self.hyperparameters.target_update == 0 {
            copy_varmap(&self.q_varmap, &self.target_varmap).map_err(backend_err)?;
        }
        Ok(())
    }

    fn exploration_rate(&self) -> Option<f64> {
        Some(self.epsilon)
    }
}
