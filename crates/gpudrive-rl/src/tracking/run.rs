//! Tracked-run registration and lifecycle.

use super::{RunIdentity, TrackingMode};
use crate::config::{EnvConfig, ExperimentConfig};
use crate::log::Metrics;
use serde::Serialize;
use serde_json::{Map, Value};

/// Everything needed to open a tracked run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSpec {
    pub project: String,
    pub name: String,
    pub id: String,
    pub group: String,
    pub sync_tensorboard: bool,
    pub tags: Vec<String>,
    pub mode: TrackingMode,
    /// Merged experiment and environment configuration
    pub config: Map<String, Value>,
}

impl RunSpec {
    /// Compose the run description. Environment keys win over experiment keys
    /// of the same name in the config snapshot.
    pub fn new(exp: &ExperimentConfig, env_config: &EnvConfig, identity: &RunIdentity) -> Self {
        let mut config = exp.to_json_map();
        if let Ok(Value::Object(env)) = serde_json::to_value(env_config) {
            config.extend(env);
        }

        Self {
            project: exp.project_name.clone(),
            name: identity.to_string(),
            id: identity.to_string(),
            group: exp.group_name.clone(),
            sync_tensorboard: exp.sync_tensorboard,
            tags: exp.tags.clone(),
            mode: exp.wandb_mode,
            config,
        }
    }
}

/// Backend able to open tracked runs.
pub trait TrackingClient {
    fn init(&self, spec: &RunSpec) -> crate::Result<Box<dyn TrackedRun>>;
}

/// An open run in a tracking backend.
pub trait TrackedRun: Send {
    /// Record metrics at a global step
    fn log(&mut self, step: u64, metrics: &Metrics) -> crate::Result<()>;

    /// Finalize the run
    fn finish(&mut self) -> crate::Result<()>;
}

/// Owned handle to a tracked run.
///
/// A handle without a backing run is inert: logging and finishing do nothing.
/// The run is finalized exactly once, by [`RunHandle::finish`] or on drop.
pub struct RunHandle {
    run_id: String,
    run: Option<Box<dyn TrackedRun>>,
    finished: bool,
    log_failed: bool,
}

impl RunHandle {
    pub fn inert(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            run: None,
            finished: false,
            log_failed: false,
        }
    }

    fn active(run_id: impl Into<String>, run: Box<dyn TrackedRun>) -> Self {
        Self {
            run_id: run_id.into(),
            run: Some(run),
            finished: false,
            log_failed: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Whether metrics reach a tracking backend.
    pub fn is_active(&self) -> bool {
        self.run.is_some() && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Forward metrics to the run. Failures are reported once and otherwise ignored.
    pub fn log(&mut self, step: u64, metrics: &Metrics) {
        if self.finished {
            return;
        }
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if let Err(e) = run.log(step, metrics) {
            if !self.log_failed {
                tracing::warn!(run_id = %self.run_id, error = %e, "Failed to log metrics to tracked run");
                self.log_failed = true;
            }
        }
    }

    /// Finalize the run. Later calls do nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(mut run) = self.run.take() {
            match run.finish() {
                Ok(()) => tracing::info!(run_id = %self.run_id, "Tracked run finished"),
                Err(e) => {
                    tracing::warn!(run_id = %self.run_id, error = %e, "Failed to finish tracked run")
                }
            }
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Open a tracked run.
///
/// Never fails: with tracking disabled, or when the backend cannot open the
/// run, an inert handle is returned and training proceeds untracked.
pub fn register_run(client: &dyn TrackingClient, spec: RunSpec) -> RunHandle {
    if spec.mode == TrackingMode::Disabled {
        tracing::info!(run_id = %spec.id, "Tracking disabled");
        return RunHandle::inert(spec.id);
    }

    match client.init(&spec) {
        Ok(run) => {
            tracing::info!(
                run_id = %spec.id,
                project = %spec.project,
                group = %spec.group,
                mode = %spec.mode,
                "Registered tracked run"
            );
            RunHandle::active(spec.id, run)
        }
        Err(e) => {
            tracing::warn!(
                run_id = %spec.id,
                error = %e,
                "Could not open tracked run; continuing without tracking"
            );
            RunHandle::inert(spec.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;
    use crate::IppoError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counts {
        inits: AtomicUsize,
        logs: AtomicUsize,
        finishes: AtomicUsize,
    }

    struct CountingRun {
        counts: Arc<Counts>,
        fail_logs: bool,
    }

    impl TrackedRun for CountingRun {
        fn log(&mut self, _step: u64, _metrics: &Metrics) -> crate::Result<()> {
            self.counts.logs.fetch_add(1, Ordering::SeqCst);
            if self.fail_logs {
                Err(IppoError::Tracking("connection reset".to_string()))
            } else {
                Ok(())
            }
        }

        fn finish(&mut self) -> crate::Result<()> {
            self.counts.finishes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingClient {
        counts: Arc<Counts>,
        fail_init: bool,
        fail_logs: bool,
    }

    impl CountingClient {
        fn new(fail_init: bool, fail_logs: bool) -> Self {
            Self {
                counts: Arc::new(Counts::default()),
                fail_init,
                fail_logs,
            }
        }
    }

    impl TrackingClient for CountingClient {
        fn init(&self, _spec: &RunSpec) -> crate::Result<Box<dyn TrackedRun>> {
            self.counts.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(IppoError::Tracking("service unavailable".to_string()));
            }
            Ok(Box::new(CountingRun {
                counts: Arc::clone(&self.counts),
                fail_logs: self.fail_logs,
            }))
        }
    }

    fn spec(mode: &str) -> RunSpec {
        let exp = fixtures::experiment_with(&[("wandb_mode", mode)]);
        let env = EnvConfig::from_experiment(&exp);
        RunSpec::new(&exp, &env, &RunIdentity::generate(exp.k_unique_scenes))
    }

    #[test]
    fn test_run_spec_merges_env_over_experiment() {
        let spec = spec("offline");
        assert_eq!(spec.name, spec.id);
        assert_eq!(spec.project, "ippo-tests");
        assert_eq!(spec.tags, vec!["ippo", "test"]);
        // Experiment-only and env-only keys are both present
        assert_eq!(spec.config["n_steps"], 10);
        assert_eq!(spec.config["max_num_agents_in_scene"], 128);
        // Shared keys take the env value
        assert_eq!(spec.config["episode_len"], 20);
        assert_eq!(spec.config["obs_radius"], 50.0);
    }

    #[test]
    fn test_disabled_mode_skips_client() {
        let client = CountingClient::new(false, false);
        let mut handle = register_run(&client, spec("disabled"));
        assert!(!handle.is_active());
        handle.log(1, &Metrics::new());
        handle.finish();
        assert_eq!(client.counts.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_init_failure_degrades_to_inert() {
        let client = CountingClient::new(true, false);
        let mut handle = register_run(&client, spec("online"));
        assert_eq!(client.counts.inits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
        handle.log(1, &Metrics::new());
        handle.finish();
        assert_eq!(client.counts.logs.load(Ordering::SeqCst), 0);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_finish_exactly_once() {
        let client = CountingClient::new(false, false);
        let mut handle = register_run(&client, spec("offline"));
        assert!(handle.is_active());
        handle.log(1, &Metrics::new());
        handle.finish();
        handle.finish();
        handle.log(2, &Metrics::new());
        drop(handle);
        assert_eq!(client.counts.logs.load(Ordering::SeqCst), 1);
        assert_eq!(client.counts.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_finishes_unfinished_run() {
        let client = CountingClient::new(false, false);
        let handle = register_run(&client, spec("offline"));
        drop(handle);
        assert_eq!(client.counts.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_failures_are_swallowed() {
        let client = CountingClient::new(false, true);
        let mut handle = register_run(&client, spec("offline"));
        handle.log(1, &Metrics::new());
        handle.log(2, &Metrics::new());
        assert!(handle.is_active());
        assert_eq!(client.counts.logs.load(Ordering::SeqCst), 2);
    }
}
