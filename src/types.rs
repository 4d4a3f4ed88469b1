use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SepError};

/// A decoded mono signal. Never empty, sample rate always positive.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SepError::Decode("sample rate must be positive".into()));
        }
        if samples.is_empty() {
            return Err(SepError::Decode("audio contains no samples".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn peak_amplitude(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Raw upload as handed over by the caller. The declared MIME type is
/// informational; the bytes decide whether this is audio.
#[derive(Clone, Debug)]
pub struct UploadedAsset {
    pub name: String,
    pub mime_type: String,
    bytes: Vec<u8>,
}

impl UploadedAsset {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn declares_wav(&self) -> bool {
        WAV_MIME_TYPES
            .iter()
            .any(|m| self.mime_type.eq_ignore_ascii_case(m))
    }
}

pub const WAV_MIME: &str = "audio/wav";

const WAV_MIME_TYPES: [&str; 4] = ["audio/wav", "audio/x-wav", "audio/wave", "audio/vnd.wave"];

/// Input accepted by the separation service.
#[derive(Clone, Debug)]
pub enum AudioSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// Per-source estimates, all at the same sample rate.
#[derive(Clone, Debug)]
pub struct SeparationResult {
    pub sources: Vec<AudioBuffer>,
    pub sample_rate: u32,
}

impl SeparationResult {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// How transient audio is staged between pipeline steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StagingStrategy {
    #[default]
    InMemory,
    TempFile,
}

impl std::str::FromStr for StagingStrategy {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "in-memory" | "memory" => Ok(StagingStrategy::InMemory),
            "temp-file" | "file" => Ok(StagingStrategy::TempFile),
            other => Err(SepError::Config(format!("unknown staging strategy `{other}`"))),
        }
    }
}
