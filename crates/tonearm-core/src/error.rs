//! Error types for Tonearm.

use thiserror::Error;

use crate::types::StreamFormat;

/// Result type alias using Tonearm's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tonearm.
#[derive(Error, Debug)]
pub enum Error {
    // Decode errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    #[error("Empty stream: {0}")]
    EmptyStream(String),

    #[error("Seek failed: {0}")]
    Seek(String),

    #[error("Track handle is closed")]
    TrackClosed,

    // Output errors
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Format mismatch: stream bound to {expected}, block is {actual}")]
    FormatMismatch {
        expected: StreamFormat,
        actual: StreamFormat,
    },

    // Playback errors
    #[error("No playable files in playlist")]
    NoPlayableFiles,

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the application cannot continue after this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }

    /// Returns true if this error came from opening or decoding a file.
    pub const fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::MalformedStream(_) | Self::EmptyStream(_)
        )
    }
}
