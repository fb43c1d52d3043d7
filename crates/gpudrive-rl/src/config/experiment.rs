//! Experiment configuration loaded from YAML.

use super::error::ConfigError;
use super::field::{Field, Problems};
use super::RewardType;
use crate::env::Device;
use crate::policy::select_policy;
use crate::tracking::TrackingMode;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Keys that every experiment document must define, in document order.
const REQUIRED_KEYS: &[&str] = &[
    "reward_type",
    "collision_weight",
    "goal_achieved_weight",
    "off_road_weight",
    "episode_len",
    "remove_non_vehicles",
    "polyline_reduction_threshold",
    "observation_radius",
    "mlp_class",
    "device",
    "num_worlds",
    "n_steps",
    "num_minibatches",
    "k_unique_scenes",
    "data_dir",
    "selection_discipline",
    "project_name",
    "group_name",
    "sync_tensorboard",
    "tags",
    "wandb_mode",
    "seed",
    "verbose",
    "gamma",
    "gae_lambda",
    "vf_coef",
    "clip_range",
    "lr",
    "ent_coef",
    "n_epochs",
    "total_timesteps",
];

/// Verbosity may be written as an integer level or a boolean.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(untagged)]
enum Verbosity {
    Flag(bool),
    Level(u64),
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Level(0)
    }
}

impl From<Verbosity> for u8 {
    fn from(v: Verbosity) -> u8 {
        match v {
            Verbosity::Flag(b) => u8::from(b),
            Verbosity::Level(n) => n.min(u8::MAX as u64) as u8,
        }
    }
}

/// The document as written, before validation.
#[derive(Default, Deserialize)]
#[serde(default)]
struct RawExperiment {
    reward_type: Field<String>,
    collision_weight: Field<f64>,
    goal_achieved_weight: Field<f64>,
    off_road_weight: Field<f64>,
    episode_len: Field<u32>,
    remove_non_vehicles: Field<bool>,
    polyline_reduction_threshold: Field<f64>,
    observation_radius: Field<f64>,
    mlp_class: Field<String>,
    device: Field<String>,
    num_worlds: Field<usize>,
    n_steps: Field<usize>,
    num_minibatches: Field<usize>,
    k_unique_scenes: Field<usize>,
    data_dir: Field<String>,
    selection_discipline: Field<String>,
    project_name: Field<String>,
    group_name: Field<String>,
    sync_tensorboard: Field<bool>,
    tags: Field<Vec<String>>,
    wandb_mode: Field<String>,
    seed: Field<u64>,
    verbose: Field<Verbosity>,
    gamma: Field<f64>,
    gae_lambda: Field<f64>,
    vf_coef: Field<f64>,
    clip_range: Field<f64>,
    lr: Field<f64>,
    ent_coef: Field<f64>,
    n_epochs: Field<usize>,
    total_timesteps: Field<u64>,

    max_grad_norm: Field<f64>,
    normalize_advantage: Field<bool>,
    log_freq: Field<usize>,
    logging_collection_window: Field<usize>,
    log_dir: Field<String>,
    tracking_dir: Field<String>,

    #[serde(flatten)]
    extras: BTreeMap<String, Value>,
}

/// Complete experiment configuration.
///
/// Populated and validated once by [`ExperimentConfig::from_yaml_str`]; treat it
/// as read-only afterwards. Derived quantities are computed by methods rather
/// than stored.
#[derive(Clone, Debug, Serialize)]
pub struct ExperimentConfig {
    // Reward shaping
    pub reward_type: RewardType,
    pub collision_weight: f64,
    pub goal_achieved_weight: f64,
    pub off_road_weight: f64,

    // Environment
    pub episode_len: u32,
    pub remove_non_vehicles: bool,
    pub polyline_reduction_threshold: f64,
    pub observation_radius: f64,

    // Scenes
    pub data_dir: PathBuf,
    pub num_worlds: usize,
    pub k_unique_scenes: usize,
    /// Raw selection discipline; see [`super::SelectionDiscipline`]
    pub selection_discipline: String,

    // Model
    pub mlp_class: String,
    pub device: Device,

    // PPO
    pub n_steps: usize,
    pub num_minibatches: usize,
    pub n_epochs: usize,
    pub total_timesteps: u64,
    pub gamma: f64,
    pub gae_lambda: f64,
    pub vf_coef: f64,
    pub clip_range: f64,
    pub lr: f64,
    pub ent_coef: f64,
    pub max_grad_norm: f64,
    pub normalize_advantage: bool,
    pub seed: u64,
    pub verbose: u8,

    // Tracking
    pub project_name: String,
    pub group_name: String,
    pub sync_tensorboard: bool,
    pub tags: Vec<String>,
    pub wandb_mode: TrackingMode,
    pub log_freq: usize,
    pub logging_collection_window: usize,
    pub log_dir: PathBuf,
    pub tracking_dir: PathBuf,

    /// Keys not interpreted by this crate, kept for the logged config snapshot
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl ExperimentConfig {
    /// Load a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        match value {
            Value::Mapping(map) => Self::from_mapping(map),
            Value::Null => Err(ConfigError::Parse("document is empty".to_string())),
            _ => Err(ConfigError::Parse(
                "top-level document must be a mapping".to_string(),
            )),
        }
    }

    /// Build from an already-parsed mapping, reporting every problem at once.
    pub fn from_mapping(map: Mapping) -> Result<Self, ConfigError> {
        let raw = RawExperiment::deserialize(Value::Mapping(map))
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        raw.validate()
    }

    /// Samples collected per rollout, counted in world-steps.
    ///
    /// Loading rejects configurations where this product overflows.
    pub fn rollout_samples(&self) -> usize {
        self.num_worlds.saturating_mul(self.n_steps)
    }

    /// Minibatch size for balanced minibatching.
    ///
    /// Validation guarantees `num_minibatches` divides the rollout sample count.
    pub fn batch_size(&self) -> usize {
        self.rollout_samples() / self.num_minibatches
    }

    /// The config as a JSON object, for logging.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

impl RawExperiment {
    fn validate(self) -> Result<ExperimentConfig, ConfigError> {
        let mut p = Problems::default();

        let reward_type_raw = p.required("reward_type", self.reward_type);
        let collision_weight = p.required("collision_weight", self.collision_weight);
        let goal_achieved_weight = p.required("goal_achieved_weight", self.goal_achieved_weight);
        let off_road_weight = p.required("off_road_weight", self.off_road_weight);
        let episode_len = p.required("episode_len", self.episode_len);
        let remove_non_vehicles = p.required("remove_non_vehicles", self.remove_non_vehicles);
        let polyline_reduction_threshold =
            p.required("polyline_reduction_threshold", self.polyline_reduction_threshold);
        let observation_radius = p.required("observation_radius", self.observation_radius);
        let mlp_class = p.required("mlp_class", self.mlp_class);
        let device_raw = p.required("device", self.device);
        let num_worlds = p.required("num_worlds", self.num_worlds);
        let n_steps = p.required("n_steps", self.n_steps);
        let num_minibatches = p.required("num_minibatches", self.num_minibatches);
        let k_unique_scenes = p.required("k_unique_scenes", self.k_unique_scenes);
        let data_dir = p.required("data_dir", self.data_dir);
        let selection_discipline = p.required("selection_discipline", self.selection_discipline);
        let project_name = p.required("project_name", self.project_name);
        let group_name = p.required("group_name", self.group_name);
        let sync_tensorboard = p.required("sync_tensorboard", self.sync_tensorboard);
        let tags = p.required("tags", self.tags);
        let wandb_mode_raw = p.required("wandb_mode", self.wandb_mode);
        let seed = p.required("seed", self.seed);
        let verbose = p.required("verbose", self.verbose);
        let gamma = p.required("gamma", self.gamma);
        let gae_lambda = p.required("gae_lambda", self.gae_lambda);
        let vf_coef = p.required("vf_coef", self.vf_coef);
        let clip_range = p.required("clip_range", self.clip_range);
        let lr = p.required("lr", self.lr);
        let ent_coef = p.required("ent_coef", self.ent_coef);
        let n_epochs = p.required("n_epochs", self.n_epochs);
        let total_timesteps = p.required("total_timesteps", self.total_timesteps);

        let max_grad_norm = p.optional("max_grad_norm", self.max_grad_norm, 0.5);
        let normalize_advantage = p.optional("normalize_advantage", self.normalize_advantage, true);
        let log_freq = p.optional("log_freq", self.log_freq, 1);
        let logging_collection_window =
            p.optional("logging_collection_window", self.logging_collection_window, 100);
        let log_dir = p.optional("log_dir", self.log_dir, "runs".to_string());
        let tracking_dir = p.optional("tracking_dir", self.tracking_dir, "wandb".to_string());

        // Enumerations
        let reward_type = parse_or_reject(&mut p, "reward_type", &reward_type_raw);
        let device = parse_or_reject(&mut p, "device", &device_raw);
        let wandb_mode = parse_or_reject(&mut p, "wandb_mode", &wandb_mode_raw);
        if !p.has_failed("mlp_class") {
            if let Err(e) = select_policy(&mlp_class) {
                p.reject("mlp_class", e.to_string());
            }
        }

        // Ranges
        p.ensure("episode_len", episode_len > 0, "must be > 0");
        p.ensure("observation_radius", observation_radius > 0.0, "must be > 0");
        p.ensure("data_dir", !data_dir.is_empty(), "must not be empty");
        p.ensure("num_worlds", num_worlds > 0, "must be > 0");
        p.ensure("k_unique_scenes", k_unique_scenes > 0, "must be > 0");
        if !p.has_failed("num_worlds") {
            p.ensure(
                "k_unique_scenes",
                k_unique_scenes <= num_worlds,
                format!("must be <= num_worlds ({})", num_worlds),
            );
        }
        p.ensure("n_steps", n_steps > 0, "must be > 0");
        p.ensure("num_minibatches", num_minibatches > 0, "must be > 0");
        p.ensure("n_epochs", n_epochs > 0, "must be > 0");
        p.ensure("total_timesteps", total_timesteps > 0, "must be > 0");
        p.ensure("gamma", (0.0..=1.0).contains(&gamma), "must be in [0, 1]");
        p.ensure(
            "gae_lambda",
            (0.0..=1.0).contains(&gae_lambda),
            "must be in [0, 1]",
        );
        p.ensure("vf_coef", vf_coef >= 0.0, "must be >= 0");
        p.ensure("clip_range", clip_range > 0.0, "must be > 0");
        p.ensure("lr", lr >= 0.0 && lr.is_finite(), "must be a finite value >= 0");
        p.ensure("ent_coef", ent_coef >= 0.0, "must be >= 0");
        p.ensure("max_grad_norm", max_grad_norm > 0.0, "must be > 0");
        p.ensure("log_freq", log_freq > 0, "must be > 0");
        p.ensure(
            "logging_collection_window",
            logging_collection_window > 0,
            "must be > 0",
        );
        p.ensure("project_name", !project_name.is_empty(), "must not be empty");

        // Balanced minibatching
        let sizing_ok = !["num_worlds", "n_steps", "num_minibatches"]
            .iter()
            .any(|k| p.has_failed(k));
        if sizing_ok {
            match num_worlds.checked_mul(n_steps) {
                Some(samples) => p.ensure(
                    "num_minibatches",
                    samples % num_minibatches == 0,
                    format!(
                        "must evenly divide num_worlds * n_steps = {} (remainder {})",
                        samples,
                        samples % num_minibatches
                    ),
                ),
                None => p.reject("num_worlds", "num_worlds * n_steps overflows"),
            }
        }

        p.finish().map_err(ConfigError::Invalid)?;

        Ok(ExperimentConfig {
            reward_type,
            collision_weight,
            goal_achieved_weight,
            off_road_weight,
            episode_len,
            remove_non_vehicles,
            polyline_reduction_threshold,
            observation_radius,
            data_dir: PathBuf::from(data_dir),
            num_worlds,
            k_unique_scenes,
            selection_discipline,
            mlp_class,
            device,
            n_steps,
            num_minibatches,
            n_epochs,
            total_timesteps,
            gamma,
            gae_lambda,
            vf_coef,
            clip_range,
            lr,
            ent_coef,
            max_grad_norm,
            normalize_advantage,
            seed,
            verbose: verbose.into(),
            project_name,
            group_name,
            sync_tensorboard,
            tags,
            wandb_mode,
            log_freq,
            logging_collection_window,
            log_dir: PathBuf::from(log_dir),
            tracking_dir: PathBuf::from(tracking_dir),
            extras: json_extras(self.extras),
        })
    }
}

fn parse_or_reject<T>(p: &mut Problems, key: &str, raw: &str) -> T
where
    T: std::str::FromStr<Err = ConfigError> + Default,
{
    if p.has_failed(key) {
        return T::default();
    }
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(e) => {
            p.reject(key, e.to_string());
            T::default()
        }
    }
}

fn json_extras(extras: BTreeMap<String, Value>) -> BTreeMap<String, serde_json::Value> {
    let mut out = BTreeMap::new();
    for (key, value) in extras {
        match serde_json::to_value(&value) {
            Ok(json) => {
                out.insert(key, json);
            }
            Err(e) => tracing::warn!(key, error = %e, "Config value is not JSON-representable"),
        }
    }
    out
}

/// Every required key, in document order. Used in error messages and tests.
pub fn required_keys() -> &'static [&'static str] {
    REQUIRED_KEYS
}
