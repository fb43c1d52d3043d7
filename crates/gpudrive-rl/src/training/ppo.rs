//! PPO loss functions.

use tch::{Kind, Tensor};

/// Clipped surrogate policy loss
pub fn ppo_policy_loss(
    advantages: &Tensor,
    log_probs: &Tensor,
    old_log_probs: &Tensor,
    clip_range: f64,
) -> Tensor {
    let ratio = (log_probs - old_log_probs).exp();

    let surr1 = &ratio * advantages;
    let surr2 = ratio.clamp(1.0 - clip_range, 1.0 + clip_range) * advantages;

    -surr1.min_other(&surr2).mean(Kind::Float)
}

/// Mean squared error between value estimates and returns
pub fn value_loss(values: &Tensor, returns: &Tensor) -> Tensor {
    (values - returns).pow_tensor_scalar(2).mean(Kind::Float)
}

/// Approximate KL divergence between the old and new policies
pub fn approx_kl(log_probs: &Tensor, old_log_probs: &Tensor) -> Tensor {
    let log_ratio = log_probs - old_log_probs;
    ((log_ratio.exp() - 1.0) - &log_ratio).mean(Kind::Float)
}

/// Fraction of samples whose ratio was clipped
pub fn clip_fraction(log_probs: &Tensor, old_log_probs: &Tensor, clip_range: f64) -> Tensor {
    ((log_probs - old_log_probs).exp() - 1.0)
        .abs()
        .gt(clip_range)
        .to_kind(Kind::Float)
        .mean(Kind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_loss_unclipped_at_ratio_one() {
        let adv = Tensor::from_slice(&[1.0f32, -2.0]);
        let lp = Tensor::from_slice(&[-0.5f32, -0.5]);
        let loss = ppo_policy_loss(&adv, &lp, &lp, 0.2);
        assert!((loss.double_value(&[]) - 0.5).abs() < 1e-6);
        assert!(approx_kl(&lp, &lp).double_value(&[]).abs() < 1e-6);
        assert_eq!(clip_fraction(&lp, &lp, 0.2).double_value(&[]), 0.0);
    }

    #[test]
    fn test_value_loss() {
        let v = Tensor::from_slice(&[1.0f32, 2.0]);
        let r = Tensor::from_slice(&[0.0f32, 2.0]);
        assert!((value_loss(&v, &r).double_value(&[]) - 0.5).abs() < 1e-6);
    }
}
