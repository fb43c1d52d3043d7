//! Metric logging backends.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` for metric lines through `tracing`
//! - `TensorBoardLogger` for event files under `<log_dir>/<run_id>` (optional)
//! - `CompositeLogger` for multi-backend logging

mod console;
mod logger;
#[cfg(feature = "tensorboard")]
mod tensorboard;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MetricLogger, Metrics, NoOpLogger};
#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardLogger;
