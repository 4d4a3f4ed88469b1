use std::{sync::Arc, time::Instant};

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    config::Settings,
    core::audio::{decode_wav_bytes, read_audio, resample},
    error::{Result, SepError},
    model::{loader_for, ModelLoader, SeparationModel},
    types::{AudioBuffer, AudioSource, SeparationResult},
};

/// Peak level below which a mixture is treated as silence.
const SILENCE_FLOOR: f32 = 1e-6;

/// Process-wide access point to the separation model.
///
/// The model is loaded on first use. Concurrent first callers wait on the
/// same initialisation and all receive the same handle; a failed load leaves
/// the service uninitialised so a later request can try again.
pub struct SeparationService {
    settings: Arc<Settings>,
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn SeparationModel>>,
}

impl SeparationService {
    pub fn new(settings: Arc<Settings>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            settings,
            loader,
            model: OnceCell::new(),
        }
    }

    /// Uses the loader selected by `settings.backend`.
    pub fn from_settings(settings: Arc<Settings>) -> Result<Self> {
        let loader = loader_for(&settings)?;
        Ok(Self::new(settings, loader))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_ready(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn handle(&self) -> Result<Arc<dyn SeparationModel>> {
        self.model
            .get_or_try_init(|| {
                info!(
                    loader = self.loader.name(),
                    model = %self.settings.model_id,
                    "initialising separation model"
                );
                let started = Instant::now();
                let model = self.loader.load(&self.settings).map_err(|e| {
                    warn!(error = %format!("{e:#}"), "model initialisation failed");
                    SepError::ModelUnavailable(format!("{e:#}"))
                })?;
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "separation model ready");
                Ok(model)
            })
            .map(Arc::clone)
    }

    pub fn warm_up(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    pub fn separate(&self, source: &AudioSource) -> Result<SeparationResult> {
        let model = self.handle()?;
        let rate = self.settings.output_sample_rate;
        let expected = self.settings.expected_source_count;

        let decoded = match source {
            AudioSource::Bytes(bytes) => decode_wav_bytes(bytes)?,
            AudioSource::Path(path) => read_audio(path)?,
        };
        let mixture = decoded.into_mono()?;

        let samples = resample(mixture.samples(), mixture.sample_rate(), rate)
            .map_err(|e| SepError::Separation(format!("{e:#}")))?;
        if samples.iter().all(|s| s.abs() < SILENCE_FLOOR) {
            return Err(SepError::Separation("input is silent".into()));
        }

        let started = Instant::now();
        let raw = model
            .separate(&samples, rate)
            .map_err(|e| SepError::Separation(format!("{e:#}")))?;

        if raw.len() != expected {
            return Err(SepError::Separation(format!(
                "model `{}` returned {} sources, expected {}",
                model.name(),
                raw.len(),
                expected
            )));
        }

        let sources = raw
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                if s.iter().any(|x| !x.is_finite()) {
                    return Err(SepError::Separation(format!(
                        "source {} contains non-finite samples",
                        i + 1
                    )));
                }
                AudioBuffer::new(s, rate)
                    .map_err(|_| SepError::Separation(format!("source {} is empty", i + 1)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            model = model.name(),
            sources = sources.len(),
            input_secs = mixture.duration_secs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "separation finished"
        );

        Ok(SeparationResult {
            sources,
            sample_rate: rate,
        })
    }
}
