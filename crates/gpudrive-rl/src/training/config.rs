//! Trainer configuration.

use crate::config::{ConfigError, ExperimentConfig, FieldError};
use crate::env::Device;
use serde::Serialize;
use std::path::PathBuf;

/// Configuration for the IPPO trainer
#[derive(Clone, Debug, Serialize)]
pub struct IppoConfig {
    // Rollout
    /// Steps collected per environment before each update
    pub n_steps: usize,
    /// Minibatch size in samples
    pub batch_size: usize,
    /// Passes over the rollout per update
    pub n_epochs: usize,

    // PPO hyperparameters
    /// Discount factor
    pub gamma: f64,
    /// GAE lambda
    pub gae_lambda: f64,
    /// PPO clipping coefficient
    pub clip_range: f64,
    /// Entropy coefficient
    pub ent_coef: f64,
    /// Value function coefficient
    pub vf_coef: f64,
    /// Maximum gradient norm
    pub max_grad_norm: f64,
    pub normalize_advantage: bool,

    pub device: Device,
    pub seed: u64,
    /// 0 is silent, 1 shows progress and per-update metrics
    pub verbose: u8,
    /// Root for TensorBoard event files, one subdirectory per run
    pub tensorboard_log: Option<PathBuf>,
}

impl Default for IppoConfig {
    fn default() -> Self {
        Self {
            n_steps: 2048,
            batch_size: 64,
            n_epochs: 10,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_range: 0.2,
            ent_coef: 0.0,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            normalize_advantage: true,
            device: Device::Cpu,
            seed: 42,
            verbose: 0,
            tensorboard_log: None,
        }
    }
}

impl IppoConfig {
    /// Trainer settings for an experiment.
    ///
    /// The minibatch size is `num_worlds * n_steps / num_minibatches`; the
    /// division must be exact.
    pub fn from_experiment(
        exp: &ExperimentConfig,
        tensorboard_log: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        let samples = exp.num_worlds.checked_mul(exp.n_steps);
        match samples {
            None => errors.push(FieldError::new(
                "num_worlds",
                "num_worlds * n_steps overflows",
            )),
            Some(0) => errors.push(FieldError::new("n_steps", "rollout must contain samples")),
            Some(samples) => {
                if exp.num_minibatches == 0 || samples % exp.num_minibatches != 0 {
                    errors.push(FieldError::new(
                        "num_minibatches",
                        format!(
                            "must evenly divide num_worlds * n_steps = {} (got {})",
                            samples, exp.num_minibatches
                        ),
                    ));
                }
            }
        }
        if exp.n_epochs == 0 {
            errors.push(FieldError::new("n_epochs", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&exp.gamma) {
            errors.push(FieldError::new("gamma", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&exp.gae_lambda) {
            errors.push(FieldError::new("gae_lambda", "must be in [0, 1]"));
        }
        if exp.clip_range <= 0.0 {
            errors.push(FieldError::new("clip_range", "must be > 0"));
        }
        let samples = match samples {
            Some(samples) if errors.is_empty() => samples,
            _ => return Err(ConfigError::Invalid(errors)),
        };

        Ok(Self {
            n_steps: exp.n_steps,
            batch_size: samples / exp.num_minibatches,
            n_epochs: exp.n_epochs,
            gamma: exp.gamma,
            gae_lambda: exp.gae_lambda,
            clip_range: exp.clip_range,
            ent_coef: exp.ent_coef,
            vf_coef: exp.vf_coef,
            max_grad_norm: exp.max_grad_norm,
            normalize_advantage: exp.normalize_advantage,
            device: exp.device,
            seed: exp.seed,
            verbose: exp.verbose,
            tensorboard_log,
        })
    }

    /// Set the minibatch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the rollout length
    pub fn with_n_steps(mut self, n_steps: usize) -> Self {
        self.n_steps = n_steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;

    #[test]
    fn test_batch_size_from_experiment() {
        let exp = fixtures::experiment_with(&[
            ("num_worlds", "64"),
            ("n_steps", "200"),
            ("num_minibatches", "4"),
            ("k_unique_scenes", "3"),
        ]);
        let config = IppoConfig::from_experiment(&exp, Some(PathBuf::from("runs"))).unwrap();
        assert_eq!(config.batch_size, 3200);
        assert_eq!(config.tensorboard_log, Some(PathBuf::from("runs")));
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_inexact_division_rejected() {
        let mut exp = fixtures::experiment();
        // Bypass load-time validation
        exp.num_minibatches = 3;
        let err = IppoConfig::from_experiment(&exp, None).unwrap_err();
        assert_eq!(err.field_errors()[0].field, "num_minibatches");
    }

    #[test]
    fn test_overflowing_rollout_rejected() {
        let mut exp = fixtures::experiment();
        exp.num_worlds = usize::MAX / 2 + 1;
        exp.n_steps = 8;
        let err = IppoConfig::from_experiment(&exp, None).unwrap_err();
        assert_eq!(err.field_errors()[0].field, "num_worlds");
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_builders() {
        let config = IppoConfig::default().with_batch_size(10).with_n_steps(5);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.n_steps, 5);
    }
}
