//! Scene selection.

use super::{ConfigError, ExperimentConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// How scene files are chosen to fill a fixed number of parallel worlds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SelectionDiscipline {
    /// Sample K distinct scenes and cycle through them to fill N worlds
    #[serde(rename = "K_UNIQUE_N")]
    KUniqueN,
    /// Take the first N scenes, padding with the first scene when fewer exist
    #[serde(rename = "PAD_N")]
    PadN,
}

impl SelectionDiscipline {
    /// Interpret a configuration string: `"K_UNIQUE_N"` selects
    /// [`SelectionDiscipline::KUniqueN`], every other value selects
    /// [`SelectionDiscipline::PadN`].
    pub fn from_config_str(s: &str) -> Self {
        if s == "K_UNIQUE_N" {
            SelectionDiscipline::KUniqueN
        } else {
            SelectionDiscipline::PadN
        }
    }
}

impl fmt::Display for SelectionDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionDiscipline::KUniqueN => write!(f, "K_UNIQUE_N"),
            SelectionDiscipline::PadN => write!(f, "PAD_N"),
        }
    }
}

/// Which scenes the simulator loads.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SceneConfig {
    /// Directory containing scene files
    pub path: PathBuf,
    /// Number of worlds to fill
    pub num_scenes: usize,
    pub discipline: SelectionDiscipline,
    /// Number of distinct scenes for `KUniqueN`
    pub k_unique_scenes: usize,
}

impl SceneConfig {
    pub fn from_experiment(exp: &ExperimentConfig) -> Self {
        Self {
            path: exp.data_dir.clone(),
            num_scenes: exp.num_worlds,
            discipline: SelectionDiscipline::from_config_str(&exp.selection_discipline),
            k_unique_scenes: exp.k_unique_scenes,
        }
    }

    /// Resolve the scene file for every world, in world order.
    ///
    /// Sampling for `KUniqueN` is driven by `seed` so a run is reproducible.
    pub fn resolve(&self, seed: u64) -> Result<Vec<PathBuf>, ConfigError> {
        let available = list_scene_files(&self.path)?;
        if available.is_empty() {
            return Err(ConfigError::NoScenes(self.path.display().to_string()));
        }

        let scenes = match self.discipline {
            SelectionDiscipline::KUniqueN => {
                if self.k_unique_scenes > available.len() {
                    return Err(ConfigError::NotEnoughScenes {
                        path: self.path.display().to_string(),
                        requested: self.k_unique_scenes,
                        available: available.len(),
                    });
                }
                let mut rng = StdRng::seed_from_u64(seed);
                let mut unique: Vec<PathBuf> = available
                    .choose_multiple(&mut rng, self.k_unique_scenes)
                    .cloned()
                    .collect();
                unique.sort();
                unique.iter().cycle().take(self.num_scenes).cloned().collect()
            }
            SelectionDiscipline::PadN => {
                let mut scenes: Vec<PathBuf> =
                    available.iter().take(self.num_scenes).cloned().collect();
                let first = available[0].clone();
                scenes.resize(self.num_scenes, first);
                scenes
            }
        };

        tracing::debug!(
            discipline = %self.discipline,
            num_scenes = scenes.len(),
            "Resolved scenes"
        );
        Ok(scenes)
    }
}

/// Scene files (`*.json`) in a directory, sorted by name.
fn list_scene_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}
