//! End-to-end training entry point.
//!
//! Configuration is loaded and every pure derivation (environment overrides,
//! policy binding, schedule, trainer settings) is made before anything is
//! allocated. The environment is then built, the tracked run opened, the
//! trainer assembled and run. Teardown finalizes the run before releasing the
//! environment on every exit path.

use crate::config::{load_config, EnvConfig, ExperimentConfig, SceneConfig};
use crate::env::{make_env, DriveEnv, SimulatorFactory, VecEnvBackend};
use crate::policy::{select_policy, PolicyBinding};
use crate::schedule::Schedule;
use crate::tracking::{register_run, RunHandle, RunIdentity, RunSpec, TrackingClient};
use crate::training::{
    BackendFactory, BackendSpec, Ippo, IppoConfig, LearnOutcome, MultiAgentCallback,
};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// External services a training run depends on.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub simulator: &'a dyn SimulatorFactory,
    pub tracker: &'a dyn TrackingClient,
    pub backend: &'a dyn BackendFactory,
    /// Raised to stop training early; the run is still finalized and the
    /// environment released.
    pub interrupt: Option<&'a AtomicBool>,
}

/// Summary of a completed training run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub num_timesteps: u64,
    pub iterations: u64,
    pub stopped_early: bool,
    /// Whether metrics reached a tracking backend
    pub tracking_active: bool,
}

/// Load a configuration file and train with it.
pub fn run_training<P: AsRef<Path>>(
    config_path: P,
    collaborators: &Collaborators<'_>,
) -> crate::Result<RunResult> {
    let path = config_path.as_ref();
    tracing::info!(config = %path.display(), "Loading experiment configuration");
    let exp = load_config(path)?;
    let scene_config = SceneConfig::from_experiment(&exp);
    train(&exp, &scene_config, collaborators)
}

/// Train one IPPO run.
pub fn train(
    exp: &ExperimentConfig,
    scene_config: &SceneConfig,
    collaborators: &Collaborators<'_>,
) -> crate::Result<RunResult> {
    let env_config = EnvConfig::from_experiment(exp);
    let binding = select_policy(&exp.mlp_class)?;
    let schedule = Schedule::linear(exp.lr);
    let identity = RunIdentity::generate(exp.k_unique_scenes);
    let ippo_config = IppoConfig::from_experiment(exp, Some(exp.log_dir.clone()))?;

    tracing::info!(
        run_id = %identity,
        policy = %binding,
        num_worlds = exp.num_worlds,
        batch_size = ippo_config.batch_size,
        "Preparing training run"
    );

    // Declared before the run handle so that on unwind the run is dropped
    // (finalized) first.
    let mut env = make_env(exp, &env_config, scene_config, collaborators.simulator)?;
    let mut run = register_run(
        collaborators.tracker,
        RunSpec::new(exp, &env_config, &identity),
    );
    let tracking_active = run.is_active();

    let outcome = assemble_and_learn(
        exp,
        ippo_config,
        binding,
        schedule,
        &mut env,
        &mut run,
        collaborators,
    );

    run.finish();
    env.close();

    let outcome = outcome.map_err(|e| {
        tracing::error!(run_id = %identity, error = %e, "Training failed");
        e
    })?;

    Ok(RunResult {
        run_id: identity.to_string(),
        num_timesteps: outcome.num_timesteps,
        iterations: outcome.iterations,
        stopped_early: outcome.stopped_early,
        tracking_active,
    })
}

fn assemble_and_learn(
    exp: &ExperimentConfig,
    ippo_config: IppoConfig,
    binding: PolicyBinding,
    schedule: Schedule,
    env: &mut DriveEnv,
    run: &mut RunHandle,
    collaborators: &Collaborators<'_>,
) -> crate::Result<LearnOutcome> {
    let spec = BackendSpec {
        binding,
        layout: env.obs_layout(),
        obs_dim: env.observation_dim(),
        num_actions: env.num_actions(),
        device: exp.device,
        seed: exp.seed,
        learning_rate: schedule.initial(),
    };
    let backend = collaborators.backend.create(&spec)?;

    let logger = Ippo::default_logger(&ippo_config, run.run_id());
    let mut model = Ippo::new(ippo_config, backend, schedule).with_logger(logger);
    let mut callback = MultiAgentCallback::new(run, exp.log_freq, exp.logging_collection_window);
    if let Some(flag) = collaborators.interrupt {
        callback = callback.with_interrupt(flag);
    }

    model.learn(env, exp.total_timesteps, &mut callback)
}
