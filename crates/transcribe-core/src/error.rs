//! Error types for the transcription pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type for transcription operations
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Errors that can surface to the driver.
///
/// Per-event anomalies (out-of-range notes, zero pitch, channel overflow)
/// are not represented here: they are logged and the event is dropped so
/// the emulator is never derailed mid-track. Only setup and final I/O
/// produce caller-visible failures.
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sidecar file {path}: {source}")]
    Sidecar {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
