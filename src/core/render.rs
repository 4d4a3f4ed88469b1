use ndarray::Array2;
use serde::Serialize;

use crate::{
    core::dsp::{amplitude_to_db, stft_magnitude, waveform_envelope, DEFAULT_HOP, DEFAULT_N_FFT},
    error::{Result, SepError},
    types::AudioBuffer,
};

/// Turns a signal into something a user can look at. Implementations may
/// draw charts; the crate only relies on the returned summary.
pub trait ResultRenderer: Send + Sync {
    fn render(&self, label: &str, signal: &AudioBuffer) -> Result<SignalReport>;
}

#[derive(Clone, Debug, Serialize)]
pub struct SignalReport {
    pub label: String,
    pub sample_rate: u32,
    pub samples: usize,
    pub duration_secs: f64,
    pub peak_amplitude: f32,
    /// Min/max pairs, one per waveform column.
    pub waveform: Vec<(f32, f32)>,
    pub spectrogram: Spectrogram,
}

/// Magnitude spectrogram in dB relative to its loudest bin,
/// shape `[bins, frames]`.
#[derive(Clone, Debug, Serialize)]
pub struct Spectrogram {
    pub n_fft: usize,
    pub hop: usize,
    pub sample_rate: u32,
    pub db: Array2<f32>,
}

impl Spectrogram {
    pub fn bins(&self) -> usize {
        self.db.nrows()
    }

    pub fn frames(&self) -> usize {
        self.db.ncols()
    }

    pub fn bin_hz(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.n_fft as f32
    }

    pub fn frame_secs(&self, frame: usize) -> f32 {
        (frame * self.hop) as f32 / self.sample_rate as f32
    }
}

#[derive(Clone, Debug)]
pub struct SummaryRenderer {
    pub n_fft: usize,
    pub hop: usize,
    pub waveform_columns: usize,
}

impl Default for SummaryRenderer {
    fn default() -> Self {
        Self {
            n_fft: DEFAULT_N_FFT,
            hop: DEFAULT_HOP,
            waveform_columns: 1000,
        }
    }
}

impl ResultRenderer for SummaryRenderer {
    fn render(&self, label: &str, signal: &AudioBuffer) -> Result<SignalReport> {
        if self.n_fft == 0 || self.hop == 0 {
            return Err(SepError::Render("n_fft and hop must be positive".into()));
        }
        if signal.samples().iter().any(|s| !s.is_finite()) {
            return Err(SepError::Render(format!(
                "{label}: signal contains non-finite samples"
            )));
        }

        let magnitude = stft_magnitude(signal.samples(), self.n_fft, self.hop);

        Ok(SignalReport {
            label: label.to_string(),
            sample_rate: signal.sample_rate(),
            samples: signal.len(),
            duration_secs: signal.duration_secs(),
            peak_amplitude: signal.peak_amplitude(),
            waveform: waveform_envelope(signal.samples(), self.waveform_columns),
            spectrogram: Spectrogram {
                n_fft: self.n_fft,
                hop: self.hop,
                sample_rate: signal.sample_rate(),
                db: amplitude_to_db(&magnitude),
            },
        })
    }
}
