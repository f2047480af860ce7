//! Error handling for Stemdeck
//!
//! Every failure carries a stable error code and, where it makes sense,
//! recovery suggestions that the editor surfaces next to the failed action.

use thiserror::Error;

/// Result type alias for Stemdeck operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // Input Errors
    #[error("Could not decode audio: {reason}")]
    DecodeFailure {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    #[error("No audio is loaded")]
    NoAudioLoaded,

    // Tempo Errors
    #[error("Not enough peaks detected in audio ({found} found). Try a track with a clearer rhythm.")]
    InsufficientPeaks { found: usize },

    #[error("Could not detect a consistent tempo. Try a different track.")]
    NoConsistentTempo,

    #[error("No tempo available: analyze the track or set a manual BPM first")]
    MissingTempo,

    // Processing Errors
    #[error("Cannot {operation} an empty buffer")]
    EmptyBuffer { operation: &'static str },

    #[error("Render failed: {reason}")]
    RenderFailure { reason: String },

    #[error("Invalid parameter '{param}': got {value}, expected {expected}")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Mixer Errors
    #[error("Stem not found: {name}")]
    StemNotFound { name: String },

    #[error("Duplicate stem name: {name}")]
    DuplicateStemName { name: String },

    // Task Errors
    #[error("{operation} is already running")]
    OperationBusy { operation: &'static str },

    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} failed: {reason}")]
    TaskFailed {
        operation: &'static str,
        reason: String,
    },

    // Host Errors
    #[error("Audio host error: {reason}")]
    Host { reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Shorthand for an out-of-range or malformed parameter
    pub fn invalid_parameter(
        param: impl Into<String>,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        EngineError::InvalidParameter {
            param: param.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::DecodeFailure { .. } => "DECODE_FAILURE",
            EngineError::InvalidUpload { .. } => "INVALID_UPLOAD",
            EngineError::NoAudioLoaded => "NO_AUDIO_LOADED",
            EngineError::InsufficientPeaks { .. } => "INSUFFICIENT_PEAKS",
            EngineError::NoConsistentTempo => "NO_CONSISTENT_TEMPO",
            EngineError::MissingTempo => "MISSING_TEMPO",
            EngineError::EmptyBuffer { .. } => "EMPTY_BUFFER",
            EngineError::RenderFailure { .. } => "RENDER_FAILURE",
            EngineError::InvalidParameter { .. } => "INVALID_PARAMETER",
            EngineError::StemNotFound { .. } => "STEM_NOT_FOUND",
            EngineError::DuplicateStemName { .. } => "DUPLICATE_STEM_NAME",
            EngineError::OperationBusy { .. } => "OPERATION_BUSY",
            EngineError::Cancelled { .. } => "CANCELLED",
            EngineError::TaskFailed { .. } => "TASK_FAILED",
            EngineError::Host { .. } => "HOST_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the user can retry or work around this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientPeaks { .. }
                | EngineError::NoConsistentTempo
                | EngineError::MissingTempo
                | EngineError::RenderFailure { .. }
                | EngineError::InvalidUpload { .. }
                | EngineError::OperationBusy { .. }
                | EngineError::Cancelled { .. }
                | EngineError::TaskFailed { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EngineError::DecodeFailure { .. } => vec![
                "Check that the file plays in another application",
                "Try converting the file to WAV first",
            ],
            EngineError::InvalidUpload { .. } => vec![
                "Upload a WAV, MP3, or MP4 file",
                "Files must be 100MB or smaller",
            ],
            EngineError::InsufficientPeaks { .. } | EngineError::NoConsistentTempo => vec![
                "Try a track with a clearer rhythm",
                "Enter the BPM manually instead",
            ],
            EngineError::MissingTempo => vec![
                "Run tempo analysis first",
                "Enter the BPM manually (60-180)",
            ],
            EngineError::RenderFailure { .. } => vec![
                "Try exporting again",
                "Export individual stems instead of the full mix",
            ],
            EngineError::OperationBusy { .. } => {
                vec!["Wait for the running operation to finish"]
            }
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            EngineError::InsufficientPeaks { .. } | EngineError::NoConsistentTempo => {
                format!("Tempo analysis failed: {}", self)
            }
            EngineError::RenderFailure { .. } => {
                "Failed to export audio. Please try again.".to_string()
            }
            EngineError::EmptyBuffer { .. } => {
                "The loaded audio has no samples to process.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
