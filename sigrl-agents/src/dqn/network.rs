use candle_core::{Device, Error, Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, VarMap, linear};
use safetensors::serialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Layer {
    Linear(Linear),
    Activation(Activation),
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Linear(linear) => linear.forward(xs),
            Self::Activation(activation) => activation.forward(xs),
        }
    }
}

/// Feed forward Q-network, ReLU between the hidden layers.
#[derive(Debug, Clone, Default)]
pub struct QNetwork {
    layers: Vec<Layer>,
}

impl QNetwork {
    /// `layers` lists every output width, the last one being the number of actions.
    pub fn build(input_dim: usize, layers: &[usize], vb: &VarBuilder, prefix: &str) -> Result<Self> {
        let mut last_dim = input_dim;
        let mut nn = QNetwork::default();
        let num_layers = layers.len();
        for (layer_idx, layer_size) in layers.iter().enumerate() {
            let layer = linear(last_dim, *layer_size, vb.pp(format!("{prefix}{layer_idx}")))?;
            nn.layers.push(Layer::Linear(layer));
            if layer_idx != num_layers - 1 {
                nn.layers.push(Layer::Activation(Activation::Relu));
            }
            last_dim = *layer_size;
        }
        Ok(nn)
    }
}

impl Module for QNetwork {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = layer.forward(&xs)?
        }
        Ok(xs)
    }
}

/// Every variable of `varmap` as one safetensors buffer.
pub fn serialize_varmap(varmap: &VarMap) -> Result<Vec<u8>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("varmap lock poisoned".into()))?;
    let tensors: Vec<(&String, &Tensor)> = data
        .iter()
        .map(|(name, var)| (name, var.as_tensor()))
        .collect();
    serialize(tensors, None).map_err(Error::wrap)
}

/// Overwrites the variables of `varmap` with the tensors of a safetensors buffer.
pub fn load_varmap(varmap: &VarMap, buffer: &[u8], device: &Device) -> Result<()> {
    let tensors = candle_core::safetensors::load_buffer(buffer, device)?;
    assign(varmap, &tensors)
}

/// Copies the values of `source` into the same named variables of `target`.
pub fn copy_varmap(source: &VarMap, target: &VarMap) -> Result<()> {
    let tensors: HashMap<String, Tensor> = source
        .data()
        .lock()
        .map_err(|_| Error::Msg("varmap lock poisoned".into()))?
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();
    assign(target, &tensors)
}

fn assign(varmap: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("varmap lock poisoned".into()))?;
    for (name, var) in data.iter() {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| Error::Msg(format!("missing weights for {name}")))?;
        var.set(tensor)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;

    #[test]
    fn buffer_restores_weights() -> Result<()> {
        let device = Device::Cpu;
        let source = VarMap::new();
        let vb = VarBuilder::from_varmap(&source, DType::F32, &device);
        let net = QNetwork::build(3, &[8, 2], &vb, "q")?;
        let target = VarMap::new();
        let vb = VarBuilder::from_varmap(&target, DType::F32, &device);
        let copy = QNetwork::build(3, &[8, 2], &vb, "q")?;

        let xs = Tensor::new(&[[0.1f32, 0.5, 0.9]], &device)?;
        let buffer = serialize_varmap(&source)?;
        load_varmap(&target, &buffer, &device)?;
        let a = net.forward(&xs)?.to_vec2::<f32>()?;
        let b = copy.forward(&xs)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
