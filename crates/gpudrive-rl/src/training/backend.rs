//! Policy backend seam between the trainer and a neural-network library.

use crate::config::ObsLayout;
use crate::env::Device;
use crate::policy::PolicyBinding;
use ndarray::{Array1, Array2};

/// Sampled actions and estimates for a batch of observations.
#[derive(Clone, Debug, Default)]
pub struct PolicyOutput {
    /// Discrete action index per row
    pub actions: Vec<f32>,
    pub log_probs: Vec<f32>,
    pub values: Vec<f32>,
}

/// One minibatch of valid rollout samples.
#[derive(Clone, Debug)]
pub struct MiniBatch {
    pub observations: Array2<f32>,
    pub actions: Array1<f32>,
    pub old_log_probs: Array1<f32>,
    pub old_values: Array1<f32>,
    pub advantages: Array1<f32>,
    pub returns: Array1<f32>,
}

impl MiniBatch {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// PPO coefficients applied to every minibatch update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateParams {
    pub clip_range: f64,
    pub ent_coef: f64,
    pub vf_coef: f64,
    pub max_grad_norm: f64,
}

/// Statistics from one gradient step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UpdateStats {
    pub loss: f64,
    pub policy_loss: f64,
    pub value_loss: f64,
    pub entropy: f64,
    pub approx_kl: f64,
    pub clip_fraction: f64,
}

impl UpdateStats {
    pub fn is_finite(&self) -> bool {
        [
            self.loss,
            self.policy_loss,
            self.value_loss,
            self.entropy,
            self.approx_kl,
            self.clip_fraction,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    pub(crate) fn accumulate(&mut self, other: &UpdateStats) {
        self.loss += other.loss;
        self.policy_loss += other.policy_loss;
        self.value_loss += other.value_loss;
        self.entropy += other.entropy;
        self.approx_kl += other.approx_kl;
        self.clip_fraction += other.clip_fraction;
    }

    pub(crate) fn scaled(&self, factor: f64) -> UpdateStats {
        UpdateStats {
            loss: self.loss * factor,
            policy_loss: self.policy_loss * factor,
            value_loss: self.value_loss * factor,
            entropy: self.entropy * factor,
            approx_kl: self.approx_kl * factor,
            clip_fraction: self.clip_fraction * factor,
        }
    }
}

/// Actor-critic model and optimizer used by the trainer.
pub trait PolicyBackend: Send {
    /// Sample actions for a batch of observations `[batch, obs_dim]`
    fn act(&mut self, observations: &Array2<f32>) -> crate::Result<PolicyOutput>;

    /// Value estimates for a batch of observations
    fn values(&mut self, observations: &Array2<f32>) -> crate::Result<Vec<f32>>;

    /// Learning rate used by subsequent updates
    fn set_learning_rate(&mut self, lr: f64);

    /// One gradient step on a minibatch
    fn update(&mut self, batch: &MiniBatch, params: &UpdateParams) -> crate::Result<UpdateStats>;
}

/// Everything a backend needs to build its model.
#[derive(Clone, Debug)]
pub struct BackendSpec {
    pub binding: PolicyBinding,
    pub layout: ObsLayout,
    pub obs_dim: usize,
    pub num_actions: usize,
    pub device: Device,
    pub seed: u64,
    pub learning_rate: f64,
}

/// Builds policy backends.
pub trait BackendFactory {
    fn create(&self, spec: &BackendSpec) -> crate::Result<Box<dyn PolicyBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&BackendSpec) -> crate::Result<Box<dyn PolicyBackend>>,
{
    fn create(&self, spec: &BackendSpec) -> crate::Result<Box<dyn PolicyBackend>> {
        self(spec)
    }
}
