//! Error types for usntrace
//!
//! Data-shape problems in device responses never surface here; they are
//! absorbed by the parsers. What remains are capability failures (no volume,
//! no journal, no raw device support), device failures, configuration
//! problems and explicit cancellation. Only capability failures are turned
//! into empty results by the public operations.

use thiserror::Error;

/// Main error type for usntrace operations
#[derive(Error, Debug)]
pub enum UsnTraceError {
    #[error("Failed to open volume '{0}': {1}")]
    VolumeOpenError(String, std::io::Error),

    #[error("Invalid volume identifier: '{0}'")]
    InvalidVolume(String),

    #[error("USN Journal not active on volume '{0}'")]
    UsnJournalNotActive(String),

    #[error("DeviceIoControl(0x{code:08X}) failed: {source}")]
    DeviceControl {
        code: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Raw volume access is not supported on this platform")]
    Unsupported,

    #[error("Failed to load configuration '{path}': {source}")]
    Config {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for usntrace operations
pub type Result<T> = std::result::Result<T, UsnTraceError>;

impl UsnTraceError {
    /// The volume simply cannot provide journal data. Callers turn these
    /// into empty results instead of failing.
    pub fn is_capability_absent(&self) -> bool {
        matches!(
            self,
            UsnTraceError::VolumeOpenError(_, _)
                | UsnTraceError::InvalidVolume(_)
                | UsnTraceError::UsnJournalNotActive(_)
                | UsnTraceError::Unsupported
        )
    }
}
