//! Rollout buffer for storing masked multi-agent experience.

use super::backend::MiniBatch;
use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Buffer of `n_steps` transitions for `num_envs` agent slots.
///
/// Transitions of slots that were not alive at the start of a step are kept
/// for shape but excluded from minibatches.
pub struct RolloutBuffer {
    /// Observations `[n_steps, num_envs, obs_dim]`
    pub observations: Array3<f32>,
    /// Action indices taken
    pub actions: Array2<f32>,
    /// Log probabilities of actions
    pub log_probs: Array2<f32>,
    pub rewards: Array2<f32>,
    /// Episode ended (1.0) after this transition; also set for invalid slots
    pub dones: Array2<f32>,
    /// Value estimates
    pub values: Array2<f32>,
    /// Transition is valid for training
    pub mask: Array2<bool>,
    /// Advantages (computed after rollout)
    pub advantages: Array2<f32>,
    /// Returns (advantages + values)
    pub returns: Array2<f32>,

    /// Current position in buffer
    pos: usize,
    n_steps: usize,
    num_envs: usize,
}

impl RolloutBuffer {
    pub fn new(n_steps: usize, num_envs: usize, obs_dim: usize) -> Self {
        let shape = (n_steps, num_envs);
        Self {
            observations: Array3::zeros((n_steps, num_envs, obs_dim)),
            actions: Array2::zeros(shape),
            log_probs: Array2::zeros(shape),
            rewards: Array2::zeros(shape),
            dones: Array2::zeros(shape),
            values: Array2::zeros(shape),
            mask: Array2::from_elem(shape, false),
            advantages: Array2::zeros(shape),
            returns: Array2::zeros(shape),
            pos: 0,
            n_steps,
            num_envs,
        }
    }

    /// Add one step of experience. All slices have one entry per env.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        observations: &Array2<f32>,
        actions: &[f32],
        log_probs: &[f32],
        values: &[f32],
        rewards: &[f32],
        dones: &[bool],
        mask: &[bool],
    ) {
        debug_assert!(!self.is_full(), "rollout buffer overflow");
        let t = self.pos;
        self.observations
            .index_axis_mut(Axis(0), t)
            .assign(observations);

        for i in 0..self.num_envs {
            let valid = mask[i];
            self.actions[[t, i]] = actions[i];
            self.log_probs[[t, i]] = log_probs[i];
            self.values[[t, i]] = values[i];
            self.rewards[[t, i]] = if valid { rewards[i] } else { 0.0 };
            self.dones[[t, i]] = if dones[i] || !valid { 1.0 } else { 0.0 };
            self.mask[[t, i]] = valid;
        }

        self.pos += 1;
    }

    /// Reset buffer position
    pub fn reset(&mut self) {
        self.pos = 0;
        self.mask.fill(false);
    }

    pub fn is_full(&self) -> bool {
        self.pos >= self.n_steps
    }

    /// Number of stored steps
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// Number of valid transitions stored
    pub fn num_valid(&self) -> usize {
        self.mask
            .slice(ndarray::s![..self.pos, ..])
            .iter()
            .filter(|&&m| m)
            .count()
    }

    /// Compute returns and advantages using GAE.
    ///
    /// `last_values` are the estimates for the observations following the
    /// final stored step.
    pub fn compute_returns_and_advantages(
        &mut self,
        last_values: &[f32],
        gamma: f64,
        gae_lambda: f64,
    ) {
        let gamma = gamma as f32;
        let gae_lambda = gae_lambda as f32;
        let mut last_gae = vec![0.0f32; self.num_envs];

        for t in (0..self.pos).rev() {
            for i in 0..self.num_envs {
                let next_value = if t + 1 == self.pos {
                    last_values[i]
                } else {
                    self.values[[t + 1, i]]
                };
                let not_done = 1.0 - self.dones[[t, i]];
                let delta = self.rewards[[t, i]] + gamma * next_value * not_done
                    - self.values[[t, i]];
                last_gae[i] = delta + gamma * gae_lambda * not_done * last_gae[i];

                self.advantages[[t, i]] = last_gae[i];
                self.returns[[t, i]] = last_gae[i] + self.values[[t, i]];
            }
        }
    }

    /// Shuffle the valid transitions and split them into minibatches of
    /// `batch_size` (the last one may be smaller).
    pub fn minibatches(
        &self,
        batch_size: usize,
        normalize_advantage: bool,
        rng: &mut StdRng,
    ) -> Vec<MiniBatch> {
        let mut indices: Vec<(usize, usize)> = (0..self.pos)
            .flat_map(|t| (0..self.num_envs).map(move |i| (t, i)))
            .filter(|&(t, i)| self.mask[[t, i]])
            .collect();
        indices.shuffle(rng);

        indices
            .chunks(batch_size.max(1))
            .map(|chunk| self.gather(chunk, normalize_advantage))
            .collect()
    }

    fn gather(&self, indices: &[(usize, usize)], normalize_advantage: bool) -> MiniBatch {
        let obs_dim = self.observations.len_of(Axis(2));
        let mut observations = Array2::zeros((indices.len(), obs_dim));
        for (row, &(t, i)) in indices.iter().enumerate() {
            observations
                .row_mut(row)
                .assign(&self.observations.slice(ndarray::s![t, i, ..]));
        }
        let pick = |a: &Array2<f32>| -> Array1<f32> {
            indices.iter().map(|&(t, i)| a[[t, i]]).collect()
        };

        let mut advantages = pick(&self.advantages);
        // A single sample has no spread to normalize by
        if normalize_advantage && advantages.len() > 1 {
            let mean = advantages.mean().unwrap_or(0.0);
            let std = advantages.std(0.0);
            advantages.mapv_inplace(|a| (a - mean) / (std + 1e-8));
        }

        MiniBatch {
            observations,
            actions: pick(&self.actions),
            old_log_probs: pick(&self.log_probs),
            old_values: pick(&self.values),
            advantages,
            returns: pick(&self.returns),
        }
    }

    /// Fraction of return variance explained by the value estimates, over valid samples.
    pub fn explained_variance(&self) -> f64 {
        let (values, returns): (Vec<f64>, Vec<f64>) = (0..self.pos)
            .flat_map(|t| (0..self.num_envs).map(move |i| (t, i)))
            .filter(|&(t, i)| self.mask[[t, i]])
            .map(|(t, i)| (self.values[[t, i]] as f64, self.returns[[t, i]] as f64))
            .unzip();
        let var_returns = variance(&returns);
        if var_returns == 0.0 {
            return f64::NAN;
        }
        let residuals: Vec<f64> = returns.iter().zip(&values).map(|(r, v)| r - v).collect();
        1.0 - variance(&residuals) / var_returns
    }
}

fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}
