//! Error types for configuration and fusion.

use thiserror::Error;

/// Rejected configuration. Raised when a config is built or loaded, never mid-computation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("weight '{name}' = {value} is outside [0, 1]")]
    WeightOutOfRange { name: String, value: f64 },

    #[error("{group} weights sum to {sum}, expected 1.0")]
    WeightsDoNotSumToOne { group: String, sum: f64 },

    #[error("quorum {quorum} must be between 1 and the method count {methods}")]
    InvalidQuorum { quorum: usize, methods: usize },

    #[error("duplicate extraction method '{0}'")]
    DuplicateMethod(String),

    #[error("invalid threshold for '{name}': {reason}")]
    InvalidThreshold { name: String, reason: String },

    #[error("invalid severity rule: {0}")]
    InvalidSeverity(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Failures surfaced by fusion, extraction and change detection.
#[derive(Debug, Error)]
pub enum FusionError {
    /// A record carried values that cannot be fused; `id` names the offender.
    #[error("malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("score map '{name}' is {found_width}x{found_height}, expected {width}x{height}")]
    ShapeMismatch {
        name: String,
        width: usize,
        height: usize,
        found_width: usize,
        found_height: usize,
    },

    #[error("score map '{name}' holds {found} values, expected {expected}")]
    DataLength {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("score map '{name}' is {width}x{height}, too large to address")]
    GridTooLarge {
        name: String,
        width: usize,
        height: usize,
    },

    #[error("score map '{0}' has no configured extraction method")]
    UnknownMethod(String),

    #[error("no score map supplied for extraction method '{0}'")]
    MissingScoreMap(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type FusionResult<T> = std::result::Result<T, FusionError>;
