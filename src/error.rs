//! Error handling for the acoustic engine
//!
//! Control-path failures carry owned context. Everything the audio thread can
//! return lives in [`BufferError`], which is `Copy` and never allocates.

use std::ffi::CStr;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Numeric status codes exposed through the C ABI
pub mod status {
    pub const OK: i32 = 0;
    pub const INVALID_PARAMETER: i32 = -1;
    pub const INVALID_CONFIGURATION: i32 = -2;
    pub const UNKNOWN_SCENARIO: i32 = -3;
    pub const INVALID_BUFFER: i32 = -4;
    pub const LOAD_FAILURE: i32 = -5;
}

/// Reasons a `process` call rejects its buffers
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("frame count {frames} exceeds the configured maximum of {max}")]
    TooManyFrames { frames: usize, max: usize },

    #[error("buffer holds no frames")]
    Empty,

    #[error("unsupported channel count {channels} (only 1 or 2)")]
    UnsupportedChannels { channels: usize },

    #[error("sample slice holds {actual} values, descriptor needs {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("input has {input} frames but output has {output}")]
    FrameCountMismatch { input: usize, output: usize },

    #[error("input and output buffers partially overlap")]
    PartialOverlap,
}

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Unknown scenario: {name}")]
    UnknownScenario { name: String },

    #[error("Invalid buffer: {0}")]
    InvalidBuffer(#[from] BufferError),

    #[error("Failed to load {}: {reason}", path.display())]
    LoadFailure { path: PathBuf, reason: String },

    #[error("Invalid parameter {param}={value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Build a `LoadFailure` for `path`
    pub fn load_failure(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::LoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Status code reported across the C ABI
    pub fn error_code(&self) -> i32 {
        match self {
            EngineError::InvalidConfiguration { .. } => status::INVALID_CONFIGURATION,
            EngineError::UnknownScenario { .. } => status::UNKNOWN_SCENARIO,
            EngineError::InvalidBuffer(_) => status::INVALID_BUFFER,
            EngineError::LoadFailure { .. } => status::LOAD_FAILURE,
            EngineError::Io(_) => status::LOAD_FAILURE,
            EngineError::Serialization(_) => status::LOAD_FAILURE,
            EngineError::InvalidParameter { .. } => status::INVALID_PARAMETER,
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            EngineError::UnknownScenario { .. } => "UNKNOWN_SCENARIO",
            EngineError::InvalidBuffer(_) => "INVALID_BUFFER",
            EngineError::LoadFailure { .. } => "LOAD_FAILURE",
            EngineError::InvalidParameter { .. } => "INVALID_PARAMETER",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the engine (or creation attempt) survives this error
    ///
    /// Setter and process failures leave the engine untouched; only
    /// configuration and mandatory load failures abort creation.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::UnknownScenario { .. } => true,
            EngineError::InvalidBuffer(_) => true,
            EngineError::InvalidParameter { .. } => true,
            _ => false,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EngineError::InvalidConfiguration { .. } => vec![
                "Start from the default configuration and change one field at a time",
                "Sample rate and max buffer size must both be positive",
            ],
            EngineError::UnknownScenario { .. } => vec![
                "List the available scenarios with `acoustic-engine scenarios`",
                "Check the preset files under the configured data path",
            ],
            EngineError::InvalidBuffer(_) => vec![
                "Split the block so it fits the configured max buffer size",
                "Only mono and stereo buffers are supported",
            ],
            EngineError::LoadFailure { .. } => vec![
                "Check that the data/HRTF path exists and is readable",
                "Validate the JSON file against the documented layout",
                "Leave the path empty to use the built-in data",
            ],
            _ => vec![],
        }
    }
}

/// Human readable text for a status code
///
/// NUL-terminated so the C ABI can hand out the pointer directly.
pub fn status_message(code: i32) -> &'static CStr {
    match code {
        status::OK => c"OK",
        status::INVALID_PARAMETER => c"Invalid parameter",
        status::INVALID_CONFIGURATION => c"Invalid configuration",
        status::UNKNOWN_SCENARIO => c"Unknown scenario",
        status::INVALID_BUFFER => c"Invalid buffer",
        status::LOAD_FAILURE => c"Load failure",
        _ => c"Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EngineError::UnknownScenario {
            name: "nowhere".to_string(),
        };
        assert_eq!(err.error_code(), status::UNKNOWN_SCENARIO);
        assert_eq!(err.kind(), "UNKNOWN_SCENARIO");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_buffer_error_converts() {
        let err: EngineError = BufferError::TooManyFrames { frames: 9, max: 8 }.into();
        assert_eq!(err.error_code(), status::INVALID_BUFFER);
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = EngineError::load_failure("/missing/presets", "not a directory");
        assert!(!err.recovery_suggestions().is_empty());
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), status::LOAD_FAILURE);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status_message(status::OK).to_str().unwrap(), "OK");
        assert_eq!(status_message(status::INVALID_BUFFER).to_str().unwrap(), "Invalid buffer");
        assert_eq!(status_message(42).to_str().unwrap(), "Unknown error");
    }
}
