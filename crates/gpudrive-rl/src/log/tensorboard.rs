//! TensorBoard logging backend.

use super::{MetricLogger, Metrics};
use std::path::Path;
use std::sync::Mutex;
use tensorboard_rs::summary_writer::SummaryWriter;

/// Logger that writes to TensorBoard event files.
pub struct TensorBoardLogger {
    writer: Mutex<SummaryWriter>,
}

impl TensorBoardLogger {
    /// Write events for one run under `log_dir/run_id`.
    pub fn for_run(log_dir: impl AsRef<Path>, run_id: &str) -> Self {
        let dir = log_dir.as_ref().join(run_id);
        tracing::info!(dir = %dir.display(), "Writing TensorBoard events");
        Self {
            writer: Mutex::new(SummaryWriter::new(&dir)),
        }
    }
}

impl MetricLogger for TensorBoardLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.add_scalar(name, value as f32, step as usize);
            let _ = writer.flush();
        }
    }

    fn log_metrics(&self, metrics: &Metrics, step: u64) {
        if let Ok(mut writer) = self.writer.lock() {
            for (name, value) in metrics {
                writer.add_scalar(name, *value as f32, step as usize);
            }
            let _ = writer.flush();
        }
    }

    fn close(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
