//! IPPO training.
//!
//! Provides:
//! - `IppoConfig` - trainer settings derived from the experiment
//! - `RolloutBuffer` - masked multi-agent rollout storage with GAE
//! - `PolicyBackend`/`BackendFactory` - the seam to the neural-network library
//! - `Ippo` - the collect/update loop
//! - `MultiAgentCallback` - episode metrics forwarded to the tracked run

mod backend;
mod buffer;
mod callback;
mod config;
mod ippo;
#[cfg(feature = "torch")]
mod ppo;
#[cfg(feature = "torch")]
mod torch;

pub use backend::{
    BackendFactory, BackendSpec, MiniBatch, PolicyBackend, PolicyOutput, UpdateParams, UpdateStats,
};
pub use buffer::RolloutBuffer;
pub use callback::{MultiAgentCallback, NoCallback, RolloutSummary, StepContext, TrainingCallback};
pub use config::IppoConfig;
pub use ippo::{Ippo, LearnOutcome};
#[cfg(feature = "torch")]
pub use ppo::{approx_kl, clip_fraction, ppo_policy_loss, value_loss};
#[cfg(feature = "torch")]
pub use torch::{TorchBackend, TorchBackendFactory};
