use std::{fmt, time::Duration};

use thiserror::Error;

/// Central error type for the speech-separation-core crate.
#[derive(Debug, Error)]
pub enum SepError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("Could not decode audio: {0}")]
    Decode(String),

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: usize, limit: usize },

    #[error("Separation model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("Separation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Artifact I/O failed for {path}: {source}")]
    ArtifactIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,
}

/// Coarse classification used by the request state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    UploadRejected,
    ModelUnavailable,
    Separation,
    Timeout,
    Render,
    ArtifactIo,
    Unexpected,
}

impl SepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SepError::Decode(_) => ErrorKind::Decode,
            SepError::UploadTooLarge { .. } => ErrorKind::UploadRejected,
            SepError::ModelUnavailable(_)
            | SepError::Config(_)
            | SepError::Manifest(_)
            | SepError::Checksum { .. }
            | SepError::CacheDirUnavailable => ErrorKind::ModelUnavailable,
            SepError::Separation(_) => ErrorKind::Separation,
            SepError::Timeout(_) => ErrorKind::Timeout,
            SepError::Render(_) => ErrorKind::Render,
            SepError::ArtifactIo { .. } => ErrorKind::ArtifactIo,
            SepError::Anyhow(_) => ErrorKind::Unexpected,
        }
    }

    pub(crate) fn artifact_io(path: impl fmt::Display, source: std::io::Error) -> Self {
        SepError::ArtifactIo {
            path: path.to_string(),
            source,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Decode => "DecodeError",
            ErrorKind::UploadRejected => "UploadRejected",
            ErrorKind::ModelUnavailable => "ModelUnavailableError",
            ErrorKind::Separation => "SeparationError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Render => "RenderError",
            ErrorKind::ArtifactIo => "ArtifactIOError",
            ErrorKind::Unexpected => "UnexpectedError",
        };
        f.write_str(s)
    }
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for SepError {
    fn from(e: std::io::Error) -> Self {
        SepError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for SepError {
    fn from(e: serde_json::Error) -> Self {
        SepError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for SepError {
    fn from(e: reqwest::Error) -> Self {
        SepError::Anyhow(e.into())
    }
}

impl From<hex::FromHexError> for SepError {
    fn from(e: hex::FromHexError) -> Self {
        SepError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, SepError>;
