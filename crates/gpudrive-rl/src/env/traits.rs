//! Simulator collaborator traits and per-step data.

use super::Device;
use crate::config::EnvConfig;
use ndarray::{Array2, Array3};
use std::path::PathBuf;

/// Information attached to an agent slot after a step.
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    /// Episode return (if the agent's episode ended this step)
    pub episode_return: Option<f32>,
    /// Episode length (if the agent's episode ended this step)
    pub episode_length: Option<f32>,
    /// Outcome flags and other scalars
    pub extra: smallvec::SmallVec<[(&'static str, f32); 4]>,
}

impl EnvInfo {
    /// Create empty info
    pub fn new() -> Self {
        Self::default()
    }

    /// Add episode stats
    pub fn with_episode_stats(mut self, ret: f32, len: u32) -> Self {
        self.episode_return = Some(ret);
        self.episode_length = Some(len as f32);
        self
    }

    /// Add a custom metric
    pub fn with_extra(mut self, key: &'static str, value: f32) -> Self {
        self.extra.push((key, value));
        self
    }

    /// Get a value by key (including the episode stats)
    pub fn get(&self, key: &str) -> Option<f32> {
        match key {
            "episode_return" => self.episode_return,
            "episode_length" => self.episode_length,
            _ => self.extra.iter().find(|(k, _)| k == &key).map(|(_, v)| *v),
        }
    }

    /// Whether this info closes an episode.
    pub fn is_episode_end(&self) -> bool {
        self.episode_return.is_some()
    }
}

/// One batched simulator frame. Every array is indexed `[world, agent]`.
#[derive(Clone, Debug)]
pub struct SimFrame {
    /// Flat per-agent observations `[num_worlds, max_agents, obs_dim]`
    pub observations: Array3<f32>,
    /// Slot holds an agent controlled by the policy
    pub controlled: Array2<bool>,
    /// Agent's episode ended this step
    pub done: Array2<bool>,
    /// Agent is within the goal threshold
    pub goal_achieved: Array2<bool>,
    /// Agent collided with another agent
    pub collided: Array2<bool>,
    /// Agent left the drivable area
    pub off_road: Array2<bool>,
}

impl SimFrame {
    /// An all-empty frame of the given shape.
    pub fn empty(num_worlds: usize, max_agents: usize, obs_dim: usize) -> Self {
        let flags = Array2::from_elem((num_worlds, max_agents), false);
        Self {
            observations: Array3::zeros((num_worlds, max_agents, obs_dim)),
            controlled: flags.clone(),
            done: flags.clone(),
            goal_achieved: flags.clone(),
            collided: flags.clone(),
            off_road: flags,
        }
    }

    pub fn num_controlled(&self) -> usize {
        self.controlled.iter().filter(|&&c| c).count()
    }
}

/// A batched multi-agent driving simulator.
///
/// Implementations own their device buffers; [`Simulator::close`] releases them.
pub trait Simulator: Send {
    /// Number of parallel worlds
    fn num_worlds(&self) -> usize;

    /// Agent slots per world
    fn max_agents(&self) -> usize;

    /// Size of one agent's flat observation
    fn observation_dim(&self) -> usize;

    /// Reset every world to the start of its scene
    fn reset(&mut self) -> crate::Result<SimFrame>;

    /// Advance every world one step with per-slot discrete action indices `[world, agent]`
    fn step(&mut self, actions: &Array2<usize>) -> crate::Result<SimFrame>;

    /// Release simulator resources
    fn close(&mut self) {}
}

/// Everything a simulator needs to be constructed.
#[derive(Clone, Debug)]
pub struct SimulatorRequest<'a> {
    pub env_config: &'a EnvConfig,
    /// Scene file for each world, in world order
    pub scenes: Vec<PathBuf>,
    /// Maximum number of policy-controlled agents per world
    pub max_cont_agents: usize,
    pub device: Device,
    pub seed: u64,
}

impl SimulatorRequest<'_> {
    pub fn num_worlds(&self) -> usize {
        self.scenes.len()
    }
}

/// Constructs simulators. Failures are reported as resource allocation errors.
pub trait SimulatorFactory {
    fn create(&self, request: &SimulatorRequest<'_>) -> crate::Result<Box<dyn Simulator>>;
}

impl<F> SimulatorFactory for F
where
    F: Fn(&SimulatorRequest<'_>) -> crate::Result<Box<dyn Simulator>>,
{
    fn create(&self, request: &SimulatorRequest<'_>) -> crate::Result<Box<dyn Simulator>> {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_info_lookup() {
        let info = EnvInfo::new()
            .with_episode_stats(2.5, 7)
            .with_extra("goal_achieved", 1.0);
        assert!(info.is_episode_end());
        assert_eq!(info.get("episode_return"), Some(2.5));
        assert_eq!(info.get("episode_length"), Some(7.0));
        assert_eq!(info.get("goal_achieved"), Some(1.0));
        assert_eq!(info.get("off_road"), None);
        assert!(!EnvInfo::new().is_episode_end());
    }

    #[test]
    fn test_empty_frame_shape() {
        let frame = SimFrame::empty(2, 3, 4);
        assert_eq!(frame.observations.dim(), (2, 3, 4));
        assert_eq!(frame.num_controlled(), 0);
    }
}
