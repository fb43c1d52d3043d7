//! Run identity.

use chrono::{DateTime, Local, TimeZone};
use std::fmt;

/// Identifier shared by the tracked run (as name and id) and the TensorBoard
/// directory: `SB3_{month}_{day}_{hour}_{second}_{k}scenes`.
///
/// Two runs started in the same second-of-minute with the same scene count
/// collide; see DESIGN.md.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunIdentity(String);

impl RunIdentity {
    /// Identity for a run starting now.
    pub fn generate(k_unique_scenes: usize) -> Self {
        Self::at(&Local::now(), k_unique_scenes)
    }

    /// Identity for a run starting at `time`.
    pub fn at<Tz>(time: &DateTime<Tz>, k_unique_scenes: usize) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self(format!(
            "SB3_{}_{}scenes",
            time.format("%m_%d_%H_%S"),
            k_unique_scenes
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 14, 25, 9).unwrap()
    }

    #[test]
    fn test_format() {
        let id = RunIdentity::at(&fixed(), 3);
        assert_eq!(id.as_str(), "SB3_03_07_14_09_3scenes");
    }

    #[test]
    fn test_scene_count_distinguishes_runs() {
        let a = RunIdentity::at(&fixed(), 1);
        let b = RunIdentity::at(&fixed(), 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_minutes_are_not_part_of_the_id() {
        let later = Utc.with_ymd_and_hms(2024, 3, 7, 14, 26, 9).unwrap();
        assert_eq!(RunIdentity::at(&fixed(), 1), RunIdentity::at(&later, 1));
    }
}
