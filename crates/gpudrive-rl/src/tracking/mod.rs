//! Experiment tracking.
//!
//! Provides:
//! - `RunIdentity` - the timestamped run identifier
//! - `RunSpec` - everything a tracking backend needs to open a run
//! - `TrackingClient`/`TrackedRun` - the tracking backend seam
//! - `register_run` and `RunHandle` - open a run, degrading to an inert handle on failure
//! - `LocalTracker` - file-based backend writing one directory per run

mod identity;
mod local;
mod run;

pub use identity::RunIdentity;
pub use local::LocalTracker;
pub use run::{register_run, RunHandle, RunSpec, TrackedRun, TrackingClient};

use crate::config::ConfigError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How the tracking backend records a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Record and sync to the tracking service
    Online,
    /// Record locally for a later sync
    Offline,
    /// Do not record anything
    #[default]
    Disabled,
}

impl FromStr for TrackingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(TrackingMode::Online),
            "offline" => Ok(TrackingMode::Offline),
            "disabled" => Ok(TrackingMode::Disabled),
            other => Err(ConfigError::UnknownTrackingMode(other.to_string())),
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Online => write!(f, "online"),
            TrackingMode::Offline => write!(f, "offline"),
            TrackingMode::Disabled => write!(f, "disabled"),
        }
    }
}
