//! Vectorized environment abstraction.

use super::EnvInfo;
use ndarray::Array2;

/// Result from stepping all environments
#[derive(Clone, Debug)]
pub struct VecEnvResult {
    /// Next observations for all environments `[num_envs, obs_dim]`
    pub observations: Array2<f32>,
    /// Rewards for all environments
    pub rewards: Vec<f32>,
    /// Terminated flags
    pub terminated: Vec<bool>,
    /// Truncated flags
    pub truncated: Vec<bool>,
    /// Info for each environment
    pub infos: Vec<EnvInfo>,
    /// Which environments are live for the next step
    pub alive: Vec<bool>,
}

impl VecEnvResult {
    /// Check which environments are done
    pub fn dones(&self) -> Vec<bool> {
        self.terminated
            .iter()
            .zip(self.truncated.iter())
            .map(|(&t, &tr)| t || tr)
            .collect()
    }
}

/// Trait for vectorized environment backends.
///
/// Each "env" is one agent slot; slots that are not `alive` produce masked
/// transitions that must not be trained on.
pub trait VecEnvBackend: Send {
    /// Size of one flat observation
    fn observation_dim(&self) -> usize;

    /// Number of discrete actions
    fn num_actions(&self) -> usize;

    /// Number of environments (agent slots)
    fn num_envs(&self) -> usize;

    /// Number of simulated worlds; one world-step is one timestep
    fn num_worlds(&self) -> usize {
        self.num_envs()
    }

    /// Reset all environments, returning observations and the live mask
    fn reset(&mut self) -> crate::Result<(Array2<f32>, Vec<bool>)>;

    /// Step all environments with actions `[num_envs, 1]`
    fn step(&mut self, actions: &Array2<f32>) -> crate::Result<VecEnvResult>;

    /// Close all environments
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dones_combine_flags() {
        let result = VecEnvResult {
            observations: Array2::zeros((3, 1)),
            rewards: vec![0.0; 3],
            terminated: vec![true, false, false],
            truncated: vec![false, true, false],
            infos: vec![EnvInfo::new(); 3],
            alive: vec![false, false, true],
        };
        assert_eq!(result.dones(), vec![true, true, false]);
    }
}
