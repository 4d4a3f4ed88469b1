#![allow(dead_code)]

use std::{
    f32::consts::PI,
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use speech_separation_core::{
    Backend, DummyModel, ModelLoader, SeparationModel, Settings, StagingStrategy,
};

/// Two overlapping "speakers": a low voiced tone with harmonics and a
/// higher, amplitude-modulated tone.
pub fn two_speaker_samples(sample_rate: u32, secs: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * secs).round() as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let a = (2.0 * PI * 140.0 * t).sin() * 0.3 + (2.0 * PI * 280.0 * t).sin() * 0.1;
            let b = (2.0 * PI * 1800.0 * t).sin() * 0.25 * (0.5 + 0.5 * (2.0 * PI * 3.0 * t).sin());
            a + b
        })
        .collect()
}

pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    {
        let mut w = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for &s in samples {
            for _ in 0..channels {
                w.write_sample((s * i16::MAX as f32) as i16).unwrap();
            }
        }
        w.finalize().unwrap();
    }
    bytes
}

pub fn two_speaker_wav(sample_rate: u32, secs: f32) -> Vec<u8> {
    wav_bytes(&two_speaker_samples(sample_rate, secs), sample_rate, 1)
}

pub fn settings(staging: StagingStrategy) -> Settings {
    Settings {
        backend: Backend::Dummy,
        staging,
        ..Settings::default()
    }
}

/// Loader that counts its invocations, can fail a number of times first,
/// and can be slowed down to widen race windows.
pub struct CountingLoader {
    pub loads: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
    sources: Option<usize>,
}

impl CountingLoader {
    pub fn new() -> Arc<Self> {
        Self::build(0, Duration::ZERO, None)
    }

    pub fn failing(times: usize) -> Arc<Self> {
        Self::build(times, Duration::ZERO, None)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(0, delay, None)
    }

    /// Produces models that always return `sources` outputs, whatever the
    /// settings ask for.
    pub fn with_sources(sources: usize) -> Arc<Self> {
        Self::build(0, Duration::ZERO, Some(sources))
    }

    fn build(failures: usize, delay: Duration, sources: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            delay,
            sources,
        })
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self, settings: &Settings) -> anyhow::Result<Arc<dyn SeparationModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("weights not found");
        }
        let sources = self.sources.unwrap_or(settings.expected_source_count);
        Ok(Arc::new(DummyModel::new(sources)))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Model that takes longer than any sane timeout.
pub struct SleepyModel(pub Duration);

impl SeparationModel for SleepyModel {
    fn separate(&self, mixture: &[f32], _sample_rate: u32) -> anyhow::Result<Vec<Vec<f32>>> {
        thread::sleep(self.0);
        Ok(vec![mixture.to_vec(), mixture.to_vec()])
    }

    fn name(&self) -> &str {
        "sleepy"
    }
}

pub struct SleepyLoader(pub Duration);

impl ModelLoader for SleepyLoader {
    fn load(&self, _settings: &Settings) -> anyhow::Result<Arc<dyn SeparationModel>> {
        Ok(Arc::new(SleepyModel(self.0)))
    }

    fn name(&self) -> &'static str {
        "sleepy"
    }
}
