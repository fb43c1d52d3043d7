//! Categorical action distribution over the discrete steer/accel grid.

use tch::{Kind, Tensor};

/// Categorical distribution parameterized by unnormalized logits `[batch, num_actions]`.
pub struct Distribution {
    logits: Tensor,
}

impl Distribution {
    pub fn categorical(logits: Tensor) -> Self {
        Self { logits }
    }

    /// Sample one action index per row
    pub fn sample(&self) -> Tensor {
        self.logits
            .softmax(-1, Kind::Float)
            .multinomial(1, true)
            .squeeze_dim(-1)
    }

    /// Log probability of the given action indices `[batch]`
    pub fn log_prob(&self, actions: &Tensor) -> Tensor {
        let log_probs = self.logits.log_softmax(-1, Kind::Float);
        let indices = actions.to_kind(Kind::Int64).unsqueeze(-1);
        log_probs.gather(-1, &indices, false).squeeze_dim(-1)
    }

    pub fn entropy(&self) -> Tensor {
        let probs = self.logits.softmax(-1, Kind::Float);
        let log_probs = self.logits.log_softmax(-1, Kind::Float);
        -(probs * log_probs).sum_dim_intlist(Some(&[-1_i64][..]), false, Kind::Float)
    }
}
