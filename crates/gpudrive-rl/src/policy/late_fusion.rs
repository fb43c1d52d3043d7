//! Late-fusion policy.
//!
//! The flat observation is split by [`ObsLayout`] into the ego block, one
//! row per partner and one row per road point. Partners and road points go
//! through shared encoders and are max-pooled, so the result does not depend
//! on their order. The three embeddings are concatenated before the heads.

use super::{Distribution, HasVarStore, Policy};
use crate::config::{ObsLayout, PARTNER_FEATURES, ROAD_POINT_FEATURES};
use tch::{nn, nn::Module, Device, Tensor};

const EMBED: i64 = 64;
const HIDDEN: i64 = 128;

fn mlp(path: nn::Path, in_dim: i64, out_dim: i64) -> nn::Sequential {
    nn::seq()
        .add(nn::linear(&path / "fc0", in_dim, out_dim, Default::default()))
        .add(nn::layer_norm(&path / "ln", vec![out_dim], Default::default()))
        .add_fn(|x| x.tanh())
        .add(nn::linear(&path / "fc1", out_dim, out_dim, Default::default()))
}

/// Ego, partner and road-graph encoders fused by concatenation.
#[derive(Debug)]
pub struct LateFusionNet {
    layout: ObsLayout,
    ego: Option<nn::Sequential>,
    partner: Option<nn::Sequential>,
    road: Option<nn::Sequential>,
    shared: nn::Sequential,
}

impl LateFusionNet {
    pub fn new(path: nn::Path, layout: ObsLayout) -> Self {
        let ego = (layout.ego > 0).then(|| mlp(&path / "ego", layout.ego as i64, EMBED));
        let partner = (layout.num_partners > 0)
            .then(|| mlp(&path / "partner", PARTNER_FEATURES as i64, EMBED));
        let road = (layout.num_road_points > 0)
            .then(|| mlp(&path / "road", ROAD_POINT_FEATURES as i64, EMBED));

        let fused = [ego.is_some(), partner.is_some(), road.is_some()]
            .iter()
            .filter(|&&b| b)
            .count() as i64
            * EMBED;
        let shared = nn::seq()
            .add(nn::linear(&path / "shared", fused.max(1), HIDDEN, Default::default()))
            .add_fn(|x| x.relu());

        Self {
            layout,
            ego,
            partner,
            road,
            shared,
        }
    }

    pub fn out_dim(&self) -> i64 {
        HIDDEN
    }

    /// Encode a set block `[batch, n * width]` into a pooled `[batch, EMBED]`.
    fn pooled(encoder: &nn::Sequential, block: &Tensor, width: usize) -> Tensor {
        let batch = block.size()[0];
        let rows = block.reshape([batch, -1, width as i64]);
        encoder.forward(&rows).amax(&[1i64][..], false)
    }
}

impl Module for LateFusionNet {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let layout = self.layout;
        let mut parts = Vec::with_capacity(3);

        if let Some(ego) = &self.ego {
            parts.push(ego.forward(&xs.narrow(1, 0, layout.ego as i64)));
        }
        if let Some(partner) = &self.partner {
            let block = xs.narrow(
                1,
                layout.partner_offset() as i64,
                layout.partner_width() as i64,
            );
            parts.push(Self::pooled(partner, &block, PARTNER_FEATURES));
        }
        if let Some(road) = &self.road {
            let block = xs.narrow(1, layout.road_offset() as i64, layout.road_width() as i64);
            parts.push(Self::pooled(road, &block, ROAD_POINT_FEATURES));
        }

        let fused = if parts.is_empty() {
            Tensor::zeros([xs.size()[0], 1], (xs.kind(), xs.device()))
        } else {
            Tensor::cat(&parts, 1)
        };
        self.shared.forward(&fused)
    }
}

/// Actor-critic over a [`LateFusionNet`].
pub struct LateFusionPolicy {
    vs: nn::VarStore,
    net: LateFusionNet,
    actor: nn::Linear,
    critic: nn::Linear,
    device: Device,
}

impl LateFusionPolicy {
    pub fn new(layout: ObsLayout, num_actions: i64, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let net = LateFusionNet::new(&root / "late_fusion", layout);
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
}

impl HasVarStore for LateFusionPolicy {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

impl Policy for LateFusionPolicy {
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

    fn layout() -> ObsLayout {
        ObsLayout {
            ego: 6,
            num_partners: 3,
            num_road_points: 4,
        }
    }

    #[test]
    fn test_forward_shapes() {
        let layout = layout();
        let policy = LateFusionPolicy::new(layout, 91, Device::Cpu);
        let obs = Tensor::randn([5, layout.dim() as i64], (Kind::Float, Device::Cpu));
        let (dist, value) = policy.forward(&obs);
        assert_eq!(dist.logits().size(), [5, 91]);
        assert_eq!(value.size(), [5]);
    }

    #[test]
    fn test_partner_order_does_not_matter() {
        let layout = layout();
        let policy = LateFusionPolicy::new(layout, 7, Device::Cpu);
        let obs = Tensor::randn([1, layout.dim() as i64], (Kind::Float, Device::Cpu));

        // Swap the first two partner rows
        let swapped = obs.copy();
        let p = layout.partner_offset() as i64;
        let w = PARTNER_FEATURES as i64;
        swapped
            .narrow(1, p, w)
            .copy_(&obs.narrow(1, p + w, w));
        swapped
            .narrow(1, p + w, w)
            .copy_(&obs.narrow(1, p, w));

        let (_, v1) = policy.forward(&obs);
        let (_, v2) = policy.forward(&swapped);
        assert!((v1 - v2).abs().max().double_value(&[]) < 1e-5);
    }
}
