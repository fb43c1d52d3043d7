//! # gpudrive-rl
//!
//! Independent PPO (IPPO) training for batched multi-agent driving simulators.
//!
//! ## Overview
//!
//! The crate wires a YAML experiment configuration into a complete training run:
//! - `config` - typed experiment, environment and scene configuration
//! - `env` - the `Simulator` collaborator trait and the `DriveEnv` multi-agent wrapper
//! - `policy` - architecture selection (and the networks, with the `torch` feature)
//! - `schedule` - learning-rate schedules
//! - `tracking` - run identity, run registration and the local run tracker
//! - `training` - rollout buffer, IPPO trainer and training callbacks
//! - `pipeline` - `run_training`, the end-to-end entry point
//!
//! ## Features
//!
//! - `default` - Orchestration, rollout collection and GAE without neural networks
//! - `torch` - libtorch-backed policies and the PPO update (requires libtorch)
//! - `tensorboard` - TensorBoard event-file logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gpudrive_rl::prelude::*;
//!
//! let collaborators = Collaborators {
//!     simulator: &my_simulator_factory,
//!     tracker: &LocalTracker::new("wandb"),
//!     backend: &TorchBackendFactory,
//!     interrupt: None,
//! };
//! let result = run_training("baselines/ippo/config/ippo_ff_sb3.yaml", &collaborators)?;
//! println!("finished run {}", result.run_id);
//! ```

pub mod config;
pub mod env;
pub mod log;
pub mod pipeline;
pub mod policy;
pub mod schedule;
pub mod tracking;
pub mod training;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        load_config, ConfigError, EnvConfig, ExperimentConfig, ObsLayout, RewardType,
        SceneConfig, SelectionDiscipline,
    };
    pub use crate::env::{
        make_env, Device, DriveEnv, EnvInfo, SimFrame, Simulator, SimulatorFactory,
        SimulatorRequest, VecEnvBackend, VecEnvResult,
    };
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, Metrics, NoOpLogger};
    pub use crate::pipeline::{run_training, train, Collaborators, RunResult};
    pub use crate::policy::{select_policy, NetworkArch, PolicyBinding, PolicyKind};
    pub use crate::schedule::{linear_schedule, Schedule};
    pub use crate::tracking::{
        register_run, LocalTracker, RunHandle, RunIdentity, RunSpec, TrackedRun, TrackingClient,
        TrackingMode,
    };
    pub use crate::training::{
        BackendFactory, BackendSpec, Ippo, IppoConfig, LearnOutcome, MultiAgentCallback,
        NoCallback, PolicyBackend, TrainingCallback,
    };

    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;
    #[cfg(feature = "torch")]
    pub use crate::training::TorchBackendFactory;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum IppoError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),

    #[error("Tracking service error: {0}")]
    Tracking(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "torch")]
    #[error("Tensor error: {0}")]
    Tensor(#[from] tch::TchError),
}

impl IppoError {
    /// Whether the error was raised before any expensive resource was committed.
    pub fn is_config(&self) -> bool {
        matches!(self, IppoError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, IppoError>;
