//! Multi-agent driving environment.
//!
//! Flattens a batched [`Simulator`] into `num_worlds * max_agents` agent slots
//! so an independent policy can treat every controlled agent as its own
//! environment.

use super::{EnvInfo, SimFrame, Simulator, VecEnvBackend, VecEnvResult};
use crate::config::{EnvConfig, ObsLayout};
use crate::IppoError;
use ndarray::{Array2, Axis};

/// Vectorized view over a batched driving simulator.
///
/// Slots holding no controlled agent, and agents whose episode already ended,
/// are reported as not alive; their observations are zeroed and their
/// transitions carry no reward. Worlds are reset together once every
/// controlled agent is done or the episode length is reached.
pub struct DriveEnv {
    sim: Box<dyn Simulator>,
    config: EnvConfig,
    layout: ObsLayout,
    num_worlds: usize,
    max_agents: usize,
    obs_dim: usize,

    alive: Array2<bool>,
    episode_returns: Array2<f32>,
    episode_lengths: Array2<u32>,
    step_in_episode: u32,
    episodes_completed: u64,
    closed: bool,
}

impl DriveEnv {
    pub fn new(sim: Box<dyn Simulator>, config: EnvConfig) -> Self {
        let num_worlds = sim.num_worlds();
        let max_agents = sim.max_agents();
        let obs_dim = sim.observation_dim();
        let layout = config.obs_layout();
        let shape = (num_worlds, max_agents);

        tracing::info!(
            num_worlds,
            max_agents,
            obs_dim,
            num_actions = config.num_actions(),
            "Created driving environment"
        );

        Self {
            sim,
            config,
            layout,
            num_worlds,
            max_agents,
            obs_dim,
            alive: Array2::from_elem(shape, false),
            episode_returns: Array2::zeros(shape),
            episode_lengths: Array2::zeros(shape),
            step_in_episode: 0,
            episodes_completed: 0,
            closed: false,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Observation layout shared by every agent slot
    pub fn obs_layout(&self) -> ObsLayout {
        self.layout
    }

    pub fn max_agents(&self) -> usize {
        self.max_agents
    }

    /// Agent episodes finished since construction
    pub fn episodes_completed(&self) -> u64 {
        self.episodes_completed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            Err(IppoError::Training("environment is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_frame(&self, frame: &SimFrame) -> crate::Result<()> {
        let expected = (self.num_worlds, self.max_agents, self.obs_dim);
        if frame.observations.dim() != expected {
            return Err(IppoError::Training(format!(
                "simulator returned observations of shape {:?}, expected {:?}",
                frame.observations.dim(),
                expected
            )));
        }
        let flags = [
            &frame.controlled,
            &frame.done,
            &frame.goal_achieved,
            &frame.collided,
            &frame.off_road,
        ];
        if flags.iter().any(|f| f.dim() != (self.num_worlds, self.max_agents)) {
            return Err(IppoError::Training(
                "simulator returned agent flags of the wrong shape".to_string(),
            ));
        }
        Ok(())
    }

    /// Start a new episode in every world from a fresh frame.
    fn begin_episode(&mut self, frame: &SimFrame) {
        self.alive.assign(&frame.controlled);
        self.episode_returns.fill(0.0);
        self.episode_lengths.fill(0);
        self.step_in_episode = 0;

        if frame.num_controlled() == 0 {
            tracing::warn!("Reset produced no controlled agents");
        }
    }

    /// Flatten `[W, A, D]` observations to `[W * A, D]`, zeroing dead slots.
    fn flatten_observations(&self, frame: &SimFrame) -> crate::Result<Array2<f32>> {
        let num_envs = self.num_worlds * self.max_agents;
        let mut obs = Array2::from_shape_vec(
            (num_envs, self.obs_dim),
            frame.observations.iter().copied().collect(),
        )
        .map_err(|e| IppoError::Training(e.to_string()))?;

        for (mut row, &alive) in obs.axis_iter_mut(Axis(0)).zip(self.alive.iter()) {
            if !alive {
                row.fill(0.0);
            }
        }
        Ok(obs)
    }

    fn alive_flat(&self) -> Vec<bool> {
        self.alive.iter().copied().collect()
    }

    fn decode_actions(&self, actions: &Array2<f32>) -> crate::Result<Array2<usize>> {
        let num_envs = self.num_envs();
        if actions.nrows() != num_envs || actions.ncols() == 0 {
            return Err(IppoError::Training(format!(
                "expected actions of shape [{}, 1], got {:?}",
                num_envs,
                actions.dim()
            )));
        }

        let max_action = self.config.num_actions().saturating_sub(1);
        let indices: Vec<usize> = actions
            .column(0)
            .iter()
            .map(|&a| {
                if a.is_finite() && a > 0.0 {
                    (a.round() as usize).min(max_action)
                } else {
                    0
                }
            })
            .collect();

        Array2::from_shape_vec((self.num_worlds, self.max_agents), indices)
            .map_err(|e| IppoError::Training(e.to_string()))
    }
}

impl VecEnvBackend for DriveEnv {
    fn observation_dim(&self) -> usize {
        self.obs_dim
    }

    fn num_actions(&self) -> usize {
        self.config.num_actions()
    }

    fn num_envs(&self) -> usize {
        self.num_worlds * self.max_agents
    }

    fn num_worlds(&self) -> usize {
        self.num_worlds
    }

    fn reset(&mut self) -> crate::Result<(Array2<f32>, Vec<bool>)> {
        self.ensure_open()?;
        let frame = self.sim.reset()?;
        self.check_frame(&frame)?;
        self.begin_episode(&frame);
        Ok((self.flatten_observations(&frame)?, self.alive_flat()))
    }

    fn step(&mut self, actions: &Array2<f32>) -> crate::Result<VecEnvResult> {
        self.ensure_open()?;
        let sim_actions = self.decode_actions(actions)?;
        let frame = self.sim.step(&sim_actions)?;
        self.check_frame(&frame)?;
        self.step_in_episode += 1;

        let num_envs = self.num_envs();
        let mut rewards = vec![0.0; num_envs];
        let mut terminated = vec![false; num_envs];
        let mut truncated = vec![false; num_envs];
        let mut infos = vec![EnvInfo::new(); num_envs];
        let time_limit = self.step_in_episode >= self.config.episode_len;

        for w in 0..self.num_worlds {
            for a in 0..self.max_agents {
                if !self.alive[[w, a]] {
                    continue;
                }
                let i = w * self.max_agents + a;
                let goal = frame.goal_achieved[[w, a]];
                let collided = frame.collided[[w, a]];
                let off_road = frame.off_road[[w, a]];

                let reward = self.config.reward(goal, collided, off_road);
                rewards[i] = reward;
                self.episode_returns[[w, a]] += reward;
                self.episode_lengths[[w, a]] += 1;

                terminated[i] = frame.done[[w, a]];
                truncated[i] = !terminated[i] && time_limit;

                if terminated[i] || truncated[i] {
                    self.alive[[w, a]] = false;
                    self.episodes_completed += 1;
                    infos[i] = EnvInfo::new()
                        .with_episode_stats(
                            self.episode_returns[[w, a]],
                            self.episode_lengths[[w, a]],
                        )
                        .with_extra("goal_achieved", goal as u8 as f32)
                        .with_extra("collided", collided as u8 as f32)
                        .with_extra("off_road", off_road as u8 as f32);
                }
            }
        }

        let all_done = !self.alive.iter().any(|&a| a);
        let observations = if all_done || time_limit {
            tracing::debug!(step = self.step_in_episode, "Episode finished, resetting worlds");
            let fresh = self.sim.reset()?;
            self.check_frame(&fresh)?;
            self.begin_episode(&fresh);
            self.flatten_observations(&fresh)?
        } else {
            self.flatten_observations(&frame)?
        };

        Ok(VecEnvResult {
            observations,
            rewards,
            terminated,
            truncated,
            infos,
            alive: self.alive_flat(),
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.sim.close();
        self.closed = true;
        tracing::info!(episodes = self.episodes_completed, "Environment closed");
    }
}

impl Drop for DriveEnv {
    fn drop(&mut self) {
        self.close();
    }
}
