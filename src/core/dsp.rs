use ndarray::Array2;
use num_complex::Complex32;
use once_cell::sync::Lazy;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

pub const DEFAULT_N_FFT: usize = 2048;
pub const DEFAULT_HOP: usize = 512;

const AMIN: f32 = 1e-5;
const TOP_DB: f32 = 80.0;

struct FftCache {
    fft_forward: Arc<dyn Fft<f32>>,
    hann_window: Vec<f32>,
}

static FFT_CACHE_2048: Lazy<FftCache> = Lazy::new(|| FftCache::plan(DEFAULT_N_FFT));

impl FftCache {
    fn plan(n_fft: usize) -> Self {
        let mut planner = FftPlanner::new();
        FftCache {
            fft_forward: planner.plan_fft_forward(n_fft),
            hann_window: compute_hann(n_fft),
        }
    }
}

/// Periodic Hann window.
pub fn compute_hann(n_fft: usize) -> Vec<f32> {
    if n_fft <= 1 {
        return vec![1.0];
    }
    let denom = n_fft as f32;
    (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * (i as f32) / denom).cos())
        .collect()
}

/// Centered magnitude STFT of a mono signal.
/// Returns shape `[n_fft / 2 + 1, 1 + len / hop]`.
pub fn stft_magnitude(signal: &[f32], n_fft: usize, hop: usize) -> Array2<f32> {
    assert!(n_fft > 0 && hop > 0, "n_fft and hop must be positive");

    let owned;
    let cache: &FftCache = if n_fft == DEFAULT_N_FFT {
        &FFT_CACHE_2048
    } else {
        owned = FftCache::plan(n_fft);
        &owned
    };

    let t = signal.len();
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; pad + t + pad];
    padded[pad..pad + t].copy_from_slice(signal);

    let frames = 1 + t / hop;
    let bins = n_fft / 2 + 1;
    let mut out = Array2::<f32>::zeros((bins, frames));
    let mut buf = vec![Complex32::zero(); n_fft];

    for fr in 0..frames {
        let start = fr * hop;
        for i in 0..n_fft {
            let x = padded.get(start + i).copied().unwrap_or(0.0);
            buf[i] = Complex32::new(x * cache.hann_window[i], 0.0);
        }
        cache.fft_forward.process(&mut buf);
        for fi in 0..bins {
            out[(fi, fr)] = buf[fi].norm();
        }
    }

    out
}

/// Converts magnitudes to dB relative to the loudest bin, floored at -80 dB.
pub fn amplitude_to_db(magnitude: &Array2<f32>) -> Array2<f32> {
    let reference = magnitude.iter().fold(0.0f32, |m, &x| m.max(x)).max(AMIN);
    let ref_db = 20.0 * reference.log10();
    let floor = -TOP_DB;
    magnitude.mapv(|x| (20.0 * x.max(AMIN).log10() - ref_db).max(floor))
}

/// Min/max envelope with `columns` buckets, used to draw a waveform.
pub fn waveform_envelope(samples: &[f32], columns: usize) -> Vec<(f32, f32)> {
    if samples.is_empty() || columns == 0 {
        return Vec::new();
    }
    let per_column = samples.len().div_ceil(columns).max(1);
    samples
        .chunks(per_column)
        .map(|chunk| {
            chunk.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &s| {
                (lo.min(s), hi.max(s))
            })
        })
        .collect()
}
