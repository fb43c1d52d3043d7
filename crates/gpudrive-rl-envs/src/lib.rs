//! Simulators for gpudrive-rl.
//!
//! Provides a CPU kinematic driving simulator that implements the
//! `Simulator` collaborator trait:
//! - `ToyDrive` - batched worlds of bicycle-model vehicles driving to goals
//! - `ToyDriveFactory` - builds `ToyDrive` from resolved scene files
//! - `Scene` - the scene file format

mod scene;
mod toy_drive;

pub use scene::{Point, Road, RoadKind, Scene, SceneError, SceneObject};
pub use toy_drive::{ToyDrive, ToyDriveFactory};
