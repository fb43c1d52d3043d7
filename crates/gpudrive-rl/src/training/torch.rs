//! libtorch policy backend.

use super::backend::{
    BackendFactory, BackendSpec, MiniBatch, PolicyBackend, PolicyOutput, UpdateParams, UpdateStats,
};
use super::ppo::{approx_kl, clip_fraction, ppo_policy_loss, value_loss};
use crate::policy::{build_policy, Policy};
use ndarray::Array2;
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

/// Builds [`TorchBackend`]s.
pub struct TorchBackendFactory;

impl BackendFactory for TorchBackendFactory {
    fn create(&self, spec: &BackendSpec) -> crate::Result<Box<dyn PolicyBackend>> {
        Ok(Box::new(TorchBackend::new(spec)?))
    }
}

/// Actor-critic policy and Adam optimizer on a torch device.
pub struct TorchBackend {
    policy: Box<dyn Policy>,
    optimizer: nn::Optimizer,
    device: Device,
}

impl TorchBackend {
    pub fn new(spec: &BackendSpec) -> crate::Result<Self> {
        tch::manual_seed(spec.seed as i64);
        let device: Device = spec.device.into();
        let mut policy = build_policy(spec.binding, spec.layout, spec.num_actions as i64, device);
        let optimizer = nn::Adam::default().build(policy.var_store_mut(), spec.learning_rate)?;

        tracing::info!(
            policy = %spec.binding,
            device = %spec.device,
            obs_dim = spec.obs_dim,
            num_actions = spec.num_actions,
            "Built torch policy"
        );

        Ok(Self {
            policy,
            optimizer,
            device,
        })
    }

    fn to_tensor(&self, observations: &Array2<f32>) -> Tensor {
        let (rows, cols) = observations.dim();
        let data: Vec<f32> = observations.iter().copied().collect();
        Tensor::from_slice(&data)
            .reshape([rows as i64, cols as i64])
            .to_device(self.device)
    }

    fn to_vec(tensor: &Tensor) -> crate::Result<Vec<f32>> {
        let flat = tensor
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .flatten(0, -1);
        Ok(Vec::<f32>::try_from(&flat)?)
    }

    fn column(&self, values: &ndarray::Array1<f32>) -> Tensor {
        let data: Vec<f32> = values.iter().copied().collect();
        Tensor::from_slice(&data).to_device(self.device)
    }

    fn clip_gradients(&mut self, max_grad_norm: f64) {
        let mut global_norm = 0.0f64;
        for var in self.policy.var_store().variables().values() {
            let grad = var.grad();
            if grad.defined() {
                global_norm += grad
                    .pow_tensor_scalar(2.0)
                    .sum(Kind::Float)
                    .double_value(&[]);
            }
        }
        global_norm = global_norm.sqrt();

        if global_norm > max_grad_norm {
            let scale = max_grad_norm / (global_norm + 1e-6);
            for var in self.policy.var_store().variables().values() {
                let mut grad = var.grad();
                if grad.defined() {
                    let _ = grad.f_mul_scalar_(scale);
                }
            }
        }
    }
}

impl PolicyBackend for TorchBackend {
    fn act(&mut self, observations: &Array2<f32>) -> crate::Result<PolicyOutput> {
        let obs = self.to_tensor(observations);
        let (actions, log_probs, values) = tch::no_grad(|| {
            let (dist, values) = self.policy.forward(&obs);
            let actions = dist.sample();
            let log_probs = dist.log_prob(&actions);
            (actions, log_probs, values)
        });
        Ok(PolicyOutput {
            actions: Self::to_vec(&actions)?,
            log_probs: Self::to_vec(&log_probs)?,
            values: Self::to_vec(&values)?,
        })
    }

    fn values(&mut self, observations: &Array2<f32>) -> crate::Result<Vec<f32>> {
        let obs = self.to_tensor(observations);
        let values = tch::no_grad(|| self.policy.forward(&obs).1);
        Self::to_vec(&values)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_lr(lr);
    }

    fn update(&mut self, batch: &MiniBatch, params: &UpdateParams) -> crate::Result<UpdateStats> {
        let obs = self.to_tensor(&batch.observations);
        let actions = self.column(&batch.actions).to_kind(Kind::Int64);
        let old_log_probs = self.column(&batch.old_log_probs);
        let advantages = self.column(&batch.advantages);
        let returns = self.column(&batch.returns);

        let (dist, values) = self.policy.forward(&obs);
        let log_probs = dist.log_prob(&actions);
        let entropy = dist.entropy().mean(Kind::Float);

        let policy_loss = ppo_policy_loss(&advantages, &log_probs, &old_log_probs, params.clip_range);
        let v_loss = value_loss(&values, &returns);
        let loss = &policy_loss + params.vf_coef * &v_loss - params.ent_coef * &entropy;

        let stats = UpdateStats {
            loss: loss.double_value(&[]),
            policy_loss: policy_loss.double_value(&[]),
            value_loss: v_loss.double_value(&[]),
            entropy: entropy.double_value(&[]),
            approx_kl: tch::no_grad(|| approx_kl(&log_probs, &old_log_probs)).double_value(&[]),
            clip_fraction: tch::no_grad(|| {
                clip_fraction(&log_probs, &old_log_probs, params.clip_range)
            })
            .double_value(&[]),
        };
        // Skip the step; the trainer reports the non-finite loss
        if !stats.is_finite() {
            return Ok(stats);
        }

        self.optimizer.zero_grad();
        loss.backward();
        self.clip_gradients(params.max_grad_norm);
        self.optimizer.step();

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvConfig;
    use crate::policy::select_policy;

    fn spec(mlp_class: &str) -> BackendSpec {
        let env = EnvConfig {
            max_num_agents_in_scene: 3,
            max_num_road_points: 4,
            ..EnvConfig::default()
        };
        let layout = env.obs_layout();
        BackendSpec {
            binding: select_policy(mlp_class).unwrap(),
            layout,
            obs_dim: layout.dim(),
            num_actions: env.num_actions(),
            device: crate::env::Device::Cpu,
            seed: 0,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_act_and_update() {
        for mlp_class in ["feed_forward", "late_fusion"] {
            let spec = spec(mlp_class);
            let mut backend = TorchBackendFactory.create(&spec).unwrap();
            let obs = Array2::<f32>::ones((6, spec.obs_dim));
            let out = backend.act(&obs).unwrap();
            assert_eq!(out.actions.len(), 6);
            assert!(out.actions.iter().all(|&a| a >= 0.0 && (a as usize) < spec.num_actions));

            let batch = MiniBatch {
                observations: obs,
                actions: out.actions.iter().copied().collect(),
                old_log_probs: out.log_probs.iter().copied().collect(),
                old_values: out.values.iter().copied().collect(),
                advantages: ndarray::Array1::from_elem(6, 0.5),
                returns: ndarray::Array1::from_elem(6, 1.0),
            };
            let params = UpdateParams {
                clip_range: 0.2,
                ent_coef: 0.01,
                vf_coef: 0.5,
                max_grad_norm: 0.5,
            };
            backend.set_learning_rate(5e-4);
            let stats = backend.update(&batch, &params).unwrap();
            assert!(stats.is_finite());
        }
    }
}
