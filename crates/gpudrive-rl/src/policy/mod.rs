//! Policy architectures.
//!
//! Provides the selection of a network/policy pair from the `mlp_class`
//! configuration value, and with the `torch` feature the networks themselves:
//! - `FeedForwardPolicy` - MLP over the flat observation
//! - `LateFusionPolicy` - separate ego, partner and road-graph encoders fused late

use crate::config::ConfigError;
use serde::Serialize;
use std::fmt;

#[cfg(feature = "torch")]
mod distribution;
#[cfg(feature = "torch")]
mod ffn;
#[cfg(feature = "torch")]
mod late_fusion;

#[cfg(feature = "torch")]
pub use distribution::Distribution;
#[cfg(feature = "torch")]
pub use ffn::{FeedForwardPolicy, Ffn};
#[cfg(feature = "torch")]
pub use late_fusion::{LateFusionNet, LateFusionPolicy};

/// Network that encodes observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkArch {
    LateFusionNet,
    #[serde(rename = "FFN")]
    Ffn,
}

/// Actor-critic wrapper around a [`NetworkArch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PolicyKind {
    LateFusionPolicy,
    FeedForwardPolicy,
}

/// The network and policy chosen for an experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PolicyBinding {
    pub network: NetworkArch,
    pub policy: PolicyKind,
}

impl fmt::Display for PolicyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.network, self.policy)
    }
}

/// Map an `mlp_class` name to its network and policy.
///
/// Only `"late_fusion"` and `"feed_forward"` are recognized; matching is exact.
pub fn select_policy(mlp_class: &str) -> Result<PolicyBinding, ConfigError> {
    match mlp_class {
        "late_fusion" => Ok(PolicyBinding {
            network: NetworkArch::LateFusionNet,
            policy: PolicyKind::LateFusionPolicy,
        }),
        "feed_forward" => Ok(PolicyBinding {
            network: NetworkArch::Ffn,
            policy: PolicyKind::FeedForwardPolicy,
        }),
        other => Err(ConfigError::UnsupportedMlpClass(other.to_string())),
    }
}

#[cfg(feature = "torch")]
use tch::{nn, Tensor};

/// Trait for policies that have a VarStore for optimization
#[cfg(feature = "torch")]
pub trait HasVarStore {
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    fn var_store(&self) -> &nn::VarStore;
}

/// Actor-critic policy over flat agent observations.
#[cfg(feature = "torch")]
pub trait Policy: HasVarStore + Send {
    /// Forward pass returning the action distribution and value estimate
    fn forward(&self, observations: &Tensor) -> (Distribution, Tensor);
}

/// Instantiate the policy for a binding.
#[cfg(feature = "torch")]
pub fn build_policy(
    binding: PolicyBinding,
    layout: crate::config::ObsLayout,
    num_actions: i64,
    device: tch::Device,
) -> Box<dyn Policy> {
    match binding.policy {
        PolicyKind::FeedForwardPolicy => Box::new(FeedForwardPolicy::new(
            layout.dim() as i64,
            num_actions,
            device,
        )),
        PolicyKind::LateFusionPolicy => {
            Box::new(LateFusionPolicy::new(layout, num_actions, device))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_late_fusion() {
        let binding = select_policy("late_fusion").unwrap();
        assert_eq!(binding.network, NetworkArch::LateFusionNet);
        assert_eq!(binding.policy, PolicyKind::LateFusionPolicy);
    }

    #[test]
    fn test_select_feed_forward() {
        let binding = select_policy("feed_forward").unwrap();
        assert_eq!(binding.network, NetworkArch::Ffn);
        assert_eq!(binding.policy, PolicyKind::FeedForwardPolicy);
    }

    #[test]
    fn test_unsupported_names_are_config_errors() {
        for name in ["lstm", "Feed_Forward", "feed_forward ", ""] {
            match select_policy(name) {
                Err(ConfigError::UnsupportedMlpClass(got)) => assert_eq!(got, name),
                other => panic!("expected UnsupportedMlpClass for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_binding_serializes_by_name() {
        let binding = select_policy("feed_forward").unwrap();
        let json = serde_json::to_value(binding).unwrap();
        assert_eq!(json["network"], "FFN");
        assert_eq!(json["policy"], "FeedForwardPolicy");
    }
}
