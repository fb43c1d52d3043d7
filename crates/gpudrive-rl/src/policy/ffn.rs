//! Feed-forward policy over the flat observation vector.

use super::{Distribution, HasVarStore, Policy};
use tch::{nn, nn::Module, Device, Tensor};

/// Hidden width of every encoder layer
const HIDDEN: i64 = 256;
const NUM_LAYERS: usize = 2;

/// Plain MLP encoder.
#[derive(Debug)]
pub struct Ffn {
    layers: nn::Sequential,
    out_dim: i64,
}

impl Ffn {
    pub fn new(path: nn::Path, in_dim: i64, hidden: i64, num_layers: usize) -> Self {
        let mut layers = nn::seq();
        let mut width = in_dim;
        for i in 0..num_layers {
            layers = layers
                .add(nn::linear(
                    &path / format!("layer_{}", i),
                    width,
                    hidden,
                    Default::default(),
                ))
                .add_fn(|x| x.tanh());
            width = hidden;
        }
        Self {
            layers,
            out_dim: width,
        }
    }

    pub fn out_dim(&self) -> i64 {
        self.out_dim
    }
}

impl Module for Ffn {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.layers.forward(xs)
    }
}

/// Actor-critic with a shared [`Ffn`] trunk.
pub struct FeedForwardPolicy {
    vs: nn::VarStore,
    net: Ffn,
    actor: nn::Linear,
    critic: nn::Linear,
    device: Device,
}

impl FeedForwardPolicy {
    pub fn new(obs_dim: i64, num_actions: i64, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let net = Ffn::new(&root / "ffn", obs_dim, HIDDEN, NUM_LAYERS);
        let actor = nn::linear(&root / "actor", net.out_dim(), num_actions, Default::default());
        let critic = nn::linear(&root / "critic", net.out_dim(), 1, Default::default());
        Self {
            vs,
            net,
            actor,
            critic,
            device,
        }
    }

    /// Get the number of parameters
    pub fn num_parameters(&self) -> i64 {
        self.vs.variables().values().map(|v| v.numel() as i64).sum()
    }
}

impl HasVarStore for FeedForwardPolicy {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

impl Policy for FeedForwardPolicy {
    fn forward(&self, observations: &Tensor) -> (Distribution, Tensor) {
        let hidden = self.net.forward(&observations.to_device(self.device));
        let logits = self.actor.forward(&hidden);
        let value = self.critic.forward(&hidden).squeeze_dim(-1);
        (Distribution::categorical(logits), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    #[test]
    fn test_forward_shapes() {
        let policy = FeedForwardPolicy::new(10, 91, Device::Cpu);
        let obs = Tensor::randn([8, 10], (Kind::Float, Device::Cpu));
        let (dist, value) = policy.forward(&obs);
        assert_eq!(dist.logits().size(), [8, 91]);
        assert_eq!(value.size(), [8]);
        assert!(policy.num_parameters() > 0);
    }
}
