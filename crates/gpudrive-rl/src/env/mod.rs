//! Simulator interface and the multi-agent driving environment.
//!
//! Provides the `Simulator` collaborator trait a batched driving simulator
//! implements, the `DriveEnv` wrapper that exposes it as a vectorized
//! environment of agent slots, and `make_env` to build one from configuration.

mod device;
mod drive;
mod factory;
mod traits;
mod vecenv;

pub use device::Device;
pub use drive::DriveEnv;
pub use factory::make_env;
pub use traits::{EnvInfo, SimFrame, Simulator, SimulatorFactory, SimulatorRequest};
pub use vecenv::{VecEnvBackend, VecEnvResult};
