//! Simulator-facing environment configuration.

use super::{ConfigError, ExperimentConfig};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Number of ego-state features: speed, length, width, goal dx, goal dy, collided.
pub const EGO_FEATURES: usize = 6;
/// Features per observed partner: speed, dx, dy, heading, length, width.
pub const PARTNER_FEATURES: usize = 6;
/// Features per road-graph point: dx, dy, heading, segment length, road type.
pub const ROAD_POINT_FEATURES: usize = 5;

/// How rewards are computed from per-agent outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// 1 when the agent reaches its goal, 0 otherwise
    #[default]
    SparseOnGoalAchieved,
    /// Weighted sum of goal, collision and off-road indicators
    WeightedCombination,
}

impl FromStr for RewardType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sparse_on_goal_achieved" => Ok(RewardType::SparseOnGoalAchieved),
            "weighted_combination" => Ok(RewardType::WeightedCombination),
            other => Err(ConfigError::UnknownRewardType(other.to_string())),
        }
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardType::SparseOnGoalAchieved => write!(f, "sparse_on_goal_achieved"),
            RewardType::WeightedCombination => write!(f, "weighted_combination"),
        }
    }
}

/// What happens to an agent after it collides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionBehavior {
    /// Agent is removed from the scene (its episode ends)
    #[default]
    Remove,
    /// Agent stops in place
    Stop,
    /// Collisions are recorded but have no effect
    Ignore,
}

/// Environment configuration handed to the simulator.
///
/// Built from [`EnvConfig::default`] with the experiment overrides applied by
/// [`EnvConfig::from_experiment`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnvConfig {
    // Observation groups
    pub ego_state: bool,
    pub road_map_obs: bool,
    pub partner_obs: bool,
    pub norm_obs: bool,

    // Scene limits
    pub max_num_agents_in_scene: usize,
    pub max_num_road_points: usize,
    pub obs_radius: f64,
    pub polyline_reduction_threshold: f64,
    pub remove_non_vehicles: bool,

    // Episode dynamics
    pub dist_to_goal_threshold: f64,
    pub collision_behavior: CollisionBehavior,
    pub episode_len: u32,

    // Reward
    pub reward_type: RewardType,
    pub collision_weight: f64,
    pub goal_achieved_weight: f64,
    pub off_road_weight: f64,

    // Discrete action grid
    pub num_steer_actions: usize,
    pub steer_range: (f64, f64),
    pub num_accel_actions: usize,
    pub accel_range: (f64, f64),
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            ego_state: true,
            road_map_obs: true,
            partner_obs: true,
            norm_obs: true,

            max_num_agents_in_scene: 128,
            max_num_road_points: 200,
            obs_radius: 100.0,
            polyline_reduction_threshold: 1.0,
            remove_non_vehicles: true,

            dist_to_goal_threshold: 3.0,
            collision_behavior: CollisionBehavior::Remove,
            episode_len: 91,

            reward_type: RewardType::SparseOnGoalAchieved,
            collision_weight: 0.0,
            goal_achieved_weight: 1.0,
            off_road_weight: 0.0,

            num_steer_actions: 13,
            steer_range: (-1.0, 1.0),
            num_accel_actions: 7,
            accel_range: (-4.0, 4.0),
        }
    }
}

impl EnvConfig {
    /// Start from the defaults and override the experiment-controlled fields.
    pub fn from_experiment(exp: &ExperimentConfig) -> Self {
        Self {
            reward_type: exp.reward_type,
            collision_weight: exp.collision_weight,
            goal_achieved_weight: exp.goal_achieved_weight,
            off_road_weight: exp.off_road_weight,
            episode_len: exp.episode_len,
            remove_non_vehicles: exp.remove_non_vehicles,
            polyline_reduction_threshold: exp.polyline_reduction_threshold,
            obs_radius: exp.observation_radius,
            ..Self::default()
        }
    }

    /// Layout of the flat per-agent observation vector.
    pub fn obs_layout(&self) -> ObsLayout {
        ObsLayout {
            ego: if self.ego_state { EGO_FEATURES } else { 0 },
            num_partners: if self.partner_obs {
                self.max_num_agents_in_scene.saturating_sub(1)
            } else {
                0
            },
            num_road_points: if self.road_map_obs {
                self.max_num_road_points
            } else {
                0
            },
        }
    }

    /// Size of the discrete (steer x accel) action space.
    pub fn num_actions(&self) -> usize {
        self.num_steer_actions * self.num_accel_actions
    }

    /// Decode a flat action index into (steer, accel).
    pub fn decode_action(&self, index: usize) -> (f64, f64) {
        let index = index.min(self.num_actions().saturating_sub(1));
        let steer_idx = index / self.num_accel_actions;
        let accel_idx = index % self.num_accel_actions;
        (
            linspace_at(self.steer_range, self.num_steer_actions, steer_idx),
            linspace_at(self.accel_range, self.num_accel_actions, accel_idx),
        )
    }

    /// Reward for one agent-step given its outcome flags.
    pub fn reward(&self, goal_achieved: bool, collided: bool, off_road: bool) -> f32 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let value = match self.reward_type {
            RewardType::SparseOnGoalAchieved => flag(goal_achieved),
            RewardType::WeightedCombination => {
                self.goal_achieved_weight * flag(goal_achieved)
                    + self.collision_weight * flag(collided)
                    + self.off_road_weight * flag(off_road)
            }
        };
        value as f32
    }
}

fn linspace_at((low, high): (f64, f64), n: usize, i: usize) -> f64 {
    if n <= 1 {
        return low;
    }
    low + (high - low) * i as f64 / (n - 1) as f64
}

/// Segmentation of the flat observation vector into ego, partner and road blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ObsLayout {
    /// Number of ego features (0 if disabled)
    pub ego: usize,
    /// Number of partner slots
    pub num_partners: usize,
    /// Number of road-graph points
    pub num_road_points: usize,
}

impl ObsLayout {
    pub fn partner_width(&self) -> usize {
        self.num_partners * PARTNER_FEATURES
    }

    pub fn road_width(&self) -> usize {
        self.num_road_points * ROAD_POINT_FEATURES
    }

    /// Total flat observation size.
    pub fn dim(&self) -> usize {
        self.ego + self.partner_width() + self.road_width()
    }

    /// Offsets of the partner and road blocks.
    pub fn partner_offset(&self) -> usize {
        self.ego
    }

    pub fn road_offset(&self) -> usize {
        self.ego + self.partner_width()
    }
}
