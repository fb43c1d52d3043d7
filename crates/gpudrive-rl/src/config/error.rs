//! Configuration errors.

use std::fmt;

/// A single problem found while validating a configuration document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending key
    pub field: String,
    /// Human-readable description of the problem
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors raised while loading or interpreting configuration.
///
/// All variants are fatal and non-retryable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration ({} problem(s)): {}", .0.len(), join_field_errors(.0))]
    Invalid(Vec<FieldError>),

    #[error("Unsupported MLP class: {0}")]
    UnsupportedMlpClass(String),

    #[error("Invalid device selector '{0}' (expected cpu, cuda or cuda:N)")]
    InvalidDevice(String),

    #[error("Unknown tracking mode '{0}' (expected online, offline or disabled)")]
    UnknownTrackingMode(String),

    #[error("Unknown reward type '{0}'")]
    UnknownRewardType(String),

    #[error("No scene files found in {0}")]
    NoScenes(String),

    #[error("Requested {requested} unique scenes but only {available} are available in {path}")]
    NotEnoughScenes {
        path: String,
        requested: usize,
        available: usize,
    },
}

impl ConfigError {
    /// Field-level problems, if this is a validation error.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
