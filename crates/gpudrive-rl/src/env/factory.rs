//! Environment construction.

use super::{DriveEnv, SimulatorFactory, SimulatorRequest};
use crate::config::{EnvConfig, ExperimentConfig, SceneConfig};
use crate::IppoError;

/// Build the vectorized driving environment for an experiment.
///
/// Scenes are resolved before the simulator is created, so a bad data
/// directory fails as a configuration error without allocating anything.
/// Simulator failures, and simulators whose shape disagrees with the request,
/// are reported as [`IppoError::ResourceAllocation`].
pub fn make_env(
    exp: &ExperimentConfig,
    env_config: &EnvConfig,
    scene_config: &SceneConfig,
    factory: &dyn SimulatorFactory,
) -> crate::Result<DriveEnv> {
    let scenes = scene_config.resolve(exp.seed)?;
    let request = SimulatorRequest {
        env_config,
        scenes,
        max_cont_agents: env_config.max_num_agents_in_scene,
        device: exp.device,
        seed: exp.seed,
    };

    tracing::info!(
        num_worlds = request.num_worlds(),
        device = %request.device,
        "Allocating simulator"
    );

    let mut sim = factory.create(&request).map_err(|e| match e {
        IppoError::ResourceAllocation(_) | IppoError::Config(_) => e,
        other => IppoError::ResourceAllocation(other.to_string()),
    })?;

    if sim.num_worlds() != request.num_worlds() || sim.max_agents() != request.max_cont_agents {
        let message = format!(
            "simulator provides {} worlds x {} agents, requested {} x {}",
            sim.num_worlds(),
            sim.max_agents(),
            request.num_worlds(),
            request.max_cont_agents
        );
        sim.close();
        return Err(IppoError::ResourceAllocation(message));
    }

    Ok(DriveEnv::new(sim, env_config.clone()))
}
