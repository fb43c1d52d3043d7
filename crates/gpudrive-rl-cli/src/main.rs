//! IPPO training CLI
//!
//! Command-line interface for training driving agents and inspecting
//! experiment configurations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use gpudrive_rl::config::{
    load_config, EnvConfig, ExperimentConfig, SceneConfig, DEFAULT_CONFIG_PATH, PARTNER_FEATURES,
    ROAD_POINT_FEATURES,
};
use gpudrive_rl::policy::select_policy;

#[derive(Parser)]
#[command(name = "ippo")]
#[command(version, about = "IPPO - Independent PPO for multi-agent driving", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train agents from an experiment config (requires --features torch)
    Train {
        /// Experiment configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Validate a config and print the derived run settings
    CheckConfig {
        /// Experiment configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// List the scene file assigned to each world
    Scenes {
        /// Experiment configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { config } => train(&config),
        Commands::CheckConfig { config } => check_config(&config),
        Commands::Scenes { config } => scenes(&config),
    }
}

fn load(path: &Path) -> Result<ExperimentConfig> {
    load_config(path).with_context(|| format!("invalid experiment config {}", path.display()))
}

#[cfg(feature = "torch")]
fn train(config_path: &Path) -> Result<()> {
    use gpudrive_rl::pipeline::{self, Collaborators};
    use gpudrive_rl::tracking::LocalTracker;
    use gpudrive_rl::training::TorchBackendFactory;
    use gpudrive_rl_envs::ToyDriveFactory;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let exp = load(config_path)?;
    let scene_config = SceneConfig::from_experiment(&exp);
    let tracker = LocalTracker::new(&exp.tracking_dir);

    // Ctrl-C stops training at the next step so the run is still finalized
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: give up on a clean shutdown
            std::process::exit(130);
        }
    })
    .context("failed to install Ctrl-C handler")?;

    let collaborators = Collaborators {
        simulator: &ToyDriveFactory,
        tracker: &tracker,
        backend: &TorchBackendFactory,
        interrupt: Some(&*interrupted),
    };

    let result = pipeline::train(&exp, &scene_config, &collaborators)?;

    println!();
    println!("Run:         {}", result.run_id);
    println!("Timesteps:   {}", result.num_timesteps);
    println!("Iterations:  {}", result.iterations);
    if interrupted.load(Ordering::SeqCst) {
        println!("Interrupted");
    } else if result.stopped_early {
        println!("Stopped early by callback");
    }
    if result.tracking_active {
        println!("Tracked in:  {}", tracker.run_dir(&result.run_id).display());
    }
    Ok(())
}

#[cfg(not(feature = "torch"))]
fn train(config_path: &Path) -> Result<()> {
    // Fail on a bad config before complaining about the build
    load(config_path)?;
    tracing::error!("Training requires the 'torch' feature. Rebuild with:");
    tracing::error!("  cargo build --features torch");
    tracing::error!("Note: libtorch must be installed.");
    anyhow::bail!("built without a neural-network backend")
}

fn check_config(config_path: &Path) -> Result<()> {
    let exp = load(config_path)?;
    let env_config = EnvConfig::from_experiment(&exp);
    let scene_config = SceneConfig::from_experiment(&exp);
    let binding = select_policy(&exp.mlp_class)?;
    let layout = env_config.obs_layout();

    println!("Configuration OK: {}", config_path.display());
    println!();
    println!("  policy:       {} ({})", binding, exp.mlp_class);
    println!("  device:       {}", exp.device);
    println!(
        "  worlds:       {} from {} ({}, k = {})",
        exp.num_worlds,
        scene_config.path.display(),
        scene_config.discipline,
        scene_config.k_unique_scenes
    );
    println!(
        "  rollout:      {} worlds x {} steps = {} samples",
        exp.num_worlds,
        exp.n_steps,
        exp.rollout_samples()
    );
    println!("  batch_size:   {}", exp.batch_size());
    println!("  minibatches:  {}", exp.num_minibatches);
    println!(
        "  observation:  {} (ego {}, partners {} x {}, road {} x {})",
        layout.dim(),
        layout.ego,
        layout.num_partners,
        PARTNER_FEATURES,
        layout.num_road_points,
        ROAD_POINT_FEATURES
    );
    println!("  actions:      {}", env_config.num_actions());
    println!("  reward:       {}", env_config.reward_type);
    println!("  timesteps:    {}", exp.total_timesteps);
    println!(
        "  tracking:     {} (project {}, group {})",
        exp.wandb_mode, exp.project_name, exp.group_name
    );
    Ok(())
}

fn scenes(config_path: &Path) -> Result<()> {
    let exp = load(config_path)?;
    let scene_config = SceneConfig::from_experiment(&exp);
    let scenes = scene_config
        .resolve(exp.seed)
        .with_context(|| format!("resolving scenes in {}", scene_config.path.display()))?;

    println!(
        "Scenes ({}, {} worlds):",
        scene_config.discipline, scene_config.num_scenes
    );
    for (world, scene) in scenes.iter().enumerate() {
        println!("  {:>4}  {}", world, scene.display());
    }
    Ok(())
}
