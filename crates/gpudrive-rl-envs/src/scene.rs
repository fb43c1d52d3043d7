//! Scene files.
//!
//! A scene is a JSON document listing the objects present at the start of a
//! scenario and the road graph as polylines:
//!
//! ```json
//! {
//!   "name": "merge",
//!   "objects": [
//!     {"type": "vehicle", "position": {"x": 0, "y": 0}, "heading": 0,
//!      "speed": 5, "goalPosition": {"x": 40, "y": 0}, "length": 4.5, "width": 2}
//!   ],
//!   "roads": [
//!     {"type": "lane", "geometry": [{"x": -10, "y": 0}, {"x": 60, "y": 0}]}
//!   ]
//! }
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("failed to read scene {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scene {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// An object present at the start of the scene.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneObject {
    #[serde(rename = "type", default = "default_object_type")]
    pub kind: String,
    pub position: Point,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed: f64,
    pub goal_position: Point,
    #[serde(default = "default_length")]
    pub length: f64,
    #[serde(default = "default_width")]
    pub width: f64,
}

impl SceneObject {
    pub fn is_vehicle(&self) -> bool {
        self.kind == "vehicle"
    }
}

fn default_object_type() -> String {
    "vehicle".to_string()
}

fn default_length() -> f64 {
    4.5
}

fn default_width() -> f64 {
    2.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadKind {
    #[default]
    Lane,
    RoadEdge,
    RoadLine,
    #[serde(other)]
    Other,
}

impl RoadKind {
    /// Numeric code used in observations.
    pub fn code(&self) -> f32 {
        match self {
            RoadKind::Lane => 0.0,
            RoadKind::RoadEdge => 1.0,
            RoadKind::RoadLine => 2.0,
            RoadKind::Other => 3.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Road {
    #[serde(rename = "type", default)]
    pub kind: RoadKind,
    pub geometry: Vec<Point>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub roads: Vec<Road>,
}

impl Scene {
    pub fn from_json_str(json: &str, path: &str) -> Result<Self, SceneError> {
        serde_json::from_str(json).map_err(|e| SceneError::Parse {
            path: path.to_string(),
            source: e,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SceneError> {
        let display = path.as_ref().display().to_string();
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| SceneError::Io {
            path: display.clone(),
            source: e,
        })?;
        Self::from_json_str(&contents, &display)
    }
}
