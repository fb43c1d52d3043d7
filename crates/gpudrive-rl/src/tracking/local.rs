//! File-based tracking backend.
//!
//! Each run gets a directory `<root>/<run_id>` containing:
//! - `config.json` - the run spec, written at init
//! - `metrics.jsonl` - one JSON object per `log` call, with a `_step` field
//! - `summary.json` - the final metrics and sync state, written at finish

use super::{RunSpec, TrackedRun, TrackingClient, TrackingMode};
use crate::log::Metrics;
use crate::IppoError;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Tracking client that records runs on the local filesystem.
///
/// There is no remote transport: `online` runs are recorded like `offline`
/// ones and marked unsynced.
#[derive(Clone, Debug)]
pub struct LocalTracker {
    root: PathBuf,
}

impl LocalTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a run with this id is recorded in.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }
}

fn tracking_err(context: &str, path: &Path, e: impl std::fmt::Display) -> IppoError {
    IppoError::Tracking(format!("{} {}: {}", context, path.display(), e))
}

impl TrackingClient for LocalTracker {
    fn init(&self, spec: &RunSpec) -> crate::Result<Box<dyn TrackedRun>> {
        let dir = self.run_dir(&spec.id);
        fs::create_dir_all(&dir).map_err(|e| tracking_err("cannot create", &dir, e))?;

        let config_path = dir.join("config.json");
        let contents =
            serde_json::to_string_pretty(spec).map_err(|e| IppoError::Tracking(e.to_string()))?;
        fs::write(&config_path, contents)
            .map_err(|e| tracking_err("cannot write", &config_path, e))?;

        let metrics_path = dir.join("metrics.jsonl");
        let metrics = File::create(&metrics_path)
            .map_err(|e| tracking_err("cannot create", &metrics_path, e))?;

        if spec.mode == TrackingMode::Online {
            tracing::warn!(
                run_id = %spec.id,
                dir = %dir.display(),
                "No remote tracking transport; recording run locally as unsynced"
            );
        }

        Ok(Box::new(LocalRun {
            dir,
            mode: spec.mode,
            metrics: BufWriter::new(metrics),
            last: Metrics::new(),
            last_step: 0,
            num_logs: 0,
        }))
    }
}

struct LocalRun {
    dir: PathBuf,
    mode: TrackingMode,
    metrics: BufWriter<File>,
    /// Latest value of every metric seen
    last: Metrics,
    last_step: u64,
    num_logs: u64,
}

impl TrackedRun for LocalRun {
    fn log(&mut self, step: u64, metrics: &Metrics) -> crate::Result<()> {
        let mut record = serde_json::Map::new();
        record.insert("_step".to_string(), json!(step));
        for (name, value) in metrics {
            record.insert(name.clone(), json!(value));
        }
        let line = Value::Object(record).to_string();
        writeln!(self.metrics, "{}", line)
            .map_err(|e| tracking_err("cannot append to", &self.dir, e))?;

        self.last
            .extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        self.last_step = step;
        self.num_logs += 1;
        Ok(())
    }

    fn finish(&mut self) -> crate::Result<()> {
        self.metrics
            .flush()
            .map_err(|e| tracking_err("cannot flush", &self.dir, e))?;

        let summary = json!({
            "_step": self.last_step,
            "num_logs": self.num_logs,
            "mode": self.mode,
            "synced": false,
            "metrics": self.last,
        });
        let path = self.dir.join("summary.json");
        let contents =
            serde_json::to_string_pretty(&summary).map_err(|e| IppoError::Tracking(e.to_string()))?;
        fs::write(&path, contents).map_err(|e| tracking_err("cannot write", &path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{fixtures, EnvConfig};
    use crate::tracking::{register_run, RunIdentity};

    fn spec(mode: &str) -> RunSpec {
        let exp = fixtures::experiment_with(&[("wandb_mode", mode)]);
        let env = EnvConfig::from_experiment(&exp);
        RunSpec::new(&exp, &env, &RunIdentity::generate(exp.k_unique_scenes))
    }

    #[test]
    fn test_records_config_metrics_and_summary() {
        let root = tempfile::tempdir().unwrap();
        let tracker = LocalTracker::new(root.path());
        let spec = spec("offline");
        let dir = tracker.run_dir(&spec.id);

        let mut handle = register_run(&tracker, spec);
        assert!(handle.is_active());

        let mut metrics = Metrics::new();
        metrics.insert("metrics/perc_goal_achieved".to_string(), 0.5);
        handle.log(20, &metrics);
        metrics.insert("metrics/perc_goal_achieved".to_string(), 0.75);
        handle.log(40, &metrics);
        handle.finish();

        let config: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("config.json")).unwrap()).unwrap();
        assert_eq!(config["project"], "ippo-tests");
        assert_eq!(config["mode"], "offline");
        assert_eq!(config["config"]["mlp_class"], "feed_forward");

        let lines: Vec<Value> = fs::read_to_string(dir.join("metrics.jsonl"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["_step"], 40);

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["num_logs"], 2);
        assert_eq!(summary["metrics"]["metrics/perc_goal_achieved"], 0.75);
        assert_eq!(summary["synced"], false);
    }

    #[test]
    fn test_unwritable_root_degrades() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let tracker = LocalTracker::new(&blocker);
        let handle = register_run(&tracker, spec("offline"));
        assert!(!handle.is_active());
    }
}
