//! Engine error types
//!
//! Every fallible engine operation returns [`EngineResult`]. An
//! [`EngineError`] carries the [`ErrorKind`] that callers branch on plus a
//! human-readable message for logs and host UIs.

use std::fmt;

use thiserror::Error;

/// Classification of engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unknown,
    InvalidParameter,
    Timeout,

    // I/O
    FileNotFound,
    FileReadError,
    SeekError,

    // Container / format
    InvalidFormat,
    OggSyncError,
    OggStreamError,
    OggPacketCorrupt,
    OggMetadataError,
    OpusInvalidHeader,

    // Decode / DSP
    DecoderError,
    OpusDecodeError,
    ResampleError,

    // Output backend
    AudioSetupError,

    // Capacity / state
    BufferOverflow,
    BufferUnderflow,
    InvalidState,
    NotReady,
    NotInitialized,
    MaxSessionsReached,
    SessionNotFound,

    /// A command task panicked on a worker thread
    TaskFailed,
}

impl ErrorKind {
    /// Default message used when an error is raised without one
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "Unknown error",
            ErrorKind::InvalidParameter => "Invalid parameter",
            ErrorKind::Timeout => "Operation timed out",
            ErrorKind::FileNotFound => "File not found",
            ErrorKind::FileReadError => "File read error",
            ErrorKind::SeekError => "Seek error",
            ErrorKind::InvalidFormat => "Invalid format",
            ErrorKind::OggSyncError => "Ogg sync error",
            ErrorKind::OggStreamError => "Ogg stream error",
            ErrorKind::OggPacketCorrupt => "Ogg packet corrupt",
            ErrorKind::OggMetadataError => "Ogg metadata error",
            ErrorKind::OpusInvalidHeader => "Invalid Opus header",
            ErrorKind::DecoderError => "Decoder error",
            ErrorKind::OpusDecodeError => "Opus decode error",
            ErrorKind::ResampleError => "Resample error",
            ErrorKind::AudioSetupError => "Audio setup error",
            ErrorKind::BufferOverflow => "Buffer overflow",
            ErrorKind::BufferUnderflow => "Buffer underflow",
            ErrorKind::InvalidState => "Invalid state",
            ErrorKind::NotReady => "Not ready",
            ErrorKind::NotInitialized => "Not initialized",
            ErrorKind::MaxSessionsReached => "Maximum number of sessions reached",
            ErrorKind::SessionNotFound => "Session not found",
            ErrorKind::TaskFailed => "Command task failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
}

impl EngineError {
    /// Create an error with an explicit message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            kind.as_str().to_string()
        } else {
            message
        };
        Self { kind, message }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, kind.as_str())
    }
}

impl From<crate::audio::AudioError> for EngineError {
    fn from(err: crate::audio::AudioError) -> Self {
        Self::new(ErrorKind::AudioSetupError, err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
