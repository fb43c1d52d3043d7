//! Experiment, environment and scene configuration.
//!
//! Provides:
//! - `ExperimentConfig` - typed YAML experiment configuration, validated on load
//! - `EnvConfig` - simulator configuration derived from the experiment
//! - `SceneConfig` - which scene files to load and how to fill the worlds

mod env;
mod error;
mod experiment;
mod field;
mod scene;

pub use env::{
    CollisionBehavior, EnvConfig, ObsLayout, RewardType, EGO_FEATURES, PARTNER_FEATURES,
    ROAD_POINT_FEATURES,
};
pub use error::{ConfigError, FieldError};
pub use experiment::{required_keys, ExperimentConfig};
pub use scene::{SceneConfig, SelectionDiscipline};

use std::path::Path;

/// Default location of the feed-forward IPPO experiment configuration.
pub const DEFAULT_CONFIG_PATH: &str = "baselines/ippo/config/ippo_ff_sb3.yaml";

/// Load and validate an experiment configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ExperimentConfig, ConfigError> {
    ExperimentConfig::from_yaml_file(path)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Configuration documents shared by unit tests.

    use super::ExperimentConfig;

    pub const MINIMAL_YAML: &str = "\
reward_type: weighted_combination
collision_weight: -0.5
goal_achieved_weight: 1.0
off_road_weight: -0.5
episode_len: 20
remove_non_vehicles: true
polyline_reduction_threshold: 0.1
observation_radius: 50.0
mlp_class: feed_forward
device: cpu
num_worlds: 2
n_steps: 10
num_minibatches: 2
k_unique_scenes: 1
data_dir: data/examples
selection_discipline: K_UNIQUE_N
project_name: ippo-tests
group_name: unit
sync_tensorboard: false
tags: [ippo, test]
wandb_mode: disabled
seed: 42
verbose: 0
gamma: 0.99
gae_lambda: 0.95
vf_coef: 0.5
clip_range: 0.2
lr: 0.0003
ent_coef: 0.0001
n_epochs: 2
total_timesteps: 20
";

    /// The minimal document with some values replaced (keys must exist).
    pub fn yaml_with(overrides: &[(&str, &str)]) -> String {
        MINIMAL_YAML
            .lines()
            .map(|line| {
                let key = line.split(':').next().unwrap_or_default();
                match overrides.iter().find(|(k, _)| *k == key) {
                    Some((k, v)) => format!("{}: {}", k, v),
                    None => line.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The minimal document with some keys removed.
    pub fn yaml_without(keys: &[&str]) -> String {
        MINIMAL_YAML
            .lines()
            .filter(|line| {
                let key = line.split(':').next().unwrap_or_default();
                !keys.contains(&key)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn experiment() -> ExperimentConfig {
        ExperimentConfig::from_yaml_str(MINIMAL_YAML).expect("fixture config is valid")
    }

    pub fn experiment_with(overrides: &[(&str, &str)]) -> ExperimentConfig {
        ExperimentConfig::from_yaml_str(&yaml_with(overrides)).expect("fixture config is valid")
    }
}
