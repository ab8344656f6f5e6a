//! Error types for MatrixLink core.

use thiserror::Error;

/// Core error type for preset and routing operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Duplicate preset name: {0}")]
    DuplicatePresetName(String),

    #[error("Preset name must not be empty")]
    EmptyPresetName,

    #[error("Invalid preset index: {0} (must be 1 or greater)")]
    InvalidPresetIndex(u32),

    #[error("Control {label}: {points} routing points but {gains} initial gains")]
    GainCountMismatch { label: String, points: usize, gains: usize },

    #[error("Invalid gain: {0} dB (must be between -100 and 0)")]
    InvalidGain(f64),

    #[error("Invalid routing point: {0}")]
    InvalidRoutingPoint(String),
}

/// Result type alias for MatrixLink core operations.
pub type Result<T> = std::result::Result<T, Error>;
