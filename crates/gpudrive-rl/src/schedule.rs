//! Learning-rate schedules.
//!
//! Schedules are functions of `progress_remaining`, which goes from 1 at the
//! start of training to 0 at the end.

use serde::Serialize;

/// Linear decay from `initial` at the start of training to 0 at the end.
pub fn linear_schedule(initial: f64) -> impl Fn(f64) -> f64 + Clone + Send + Sync {
    move |progress_remaining: f64| progress_remaining * initial
}

/// A schedule that can be stored in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Linear { initial: f64 },
}

impl Schedule {
    pub fn linear(initial: f64) -> Self {
        Schedule::Linear { initial }
    }

    /// Value at the given remaining progress (clamped to `[0, 1]`).
    pub fn value(&self, progress_remaining: f64) -> f64 {
        let progress_remaining = progress_remaining.clamp(0.0, 1.0);
        match *self {
            Schedule::Linear { initial } => linear_schedule(initial)(progress_remaining),
        }
    }

    /// Value at the start of training.
    pub fn initial(&self) -> f64 {
        self.value(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule_endpoints() {
        let f = linear_schedule(3e-4);
        assert_eq!(f(1.0), 3e-4);
        assert_eq!(f(0.0), 0.0);
        assert!((f(0.5) - 1.5e-4).abs() < 1e-12);
    }

    #[test]
    fn test_schedule_enum() {
        let linear = Schedule::linear(0.1);
        assert_eq!(linear.initial(), 0.1);
        assert!((linear.value(0.25) - 0.025).abs() < 1e-12);
        assert_eq!(linear.value(-1.0), 0.0);
    }
}
