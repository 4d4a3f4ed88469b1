//! Separation backends.
//!
//! A [`ModelLoader`] does the expensive part once (fetching weights, spinning
//! up a runtime) and yields a [`SeparationModel`] that is then shared,
//! read-only, by every request.

pub mod dummy;
pub mod model_manager;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod python;

use std::sync::Arc;

use crate::{
    config::{Backend, Settings},
    error::Result,
};

pub trait SeparationModel: Send + Sync {
    /// Splits a mono mixture sampled at `sample_rate` into per-source
    /// estimates at the same rate.
    fn separate(&self, mixture: &[f32], sample_rate: u32) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Get the name of this model (for logging)
    fn name(&self) -> &str;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, settings: &Settings) -> anyhow::Result<Arc<dyn SeparationModel>>;

    /// Get the name of this loader (for logging)
    fn name(&self) -> &'static str;
}

/// Picks the loader matching `settings.backend`.
pub fn loader_for(settings: &Settings) -> Result<Arc<dyn ModelLoader>> {
    match settings.backend {
        Backend::Python => Ok(Arc::new(python::PythonRunnerLoader)),
        Backend::Dummy => Ok(Arc::new(dummy::DummyLoader)),
        #[cfg(feature = "onnx")]
        Backend::Onnx => Ok(Arc::new(onnx::OnnxLoader)),
        #[cfg(not(feature = "onnx"))]
        Backend::Onnx => Err(crate::error::SepError::Config(
            "the onnx backend requires building with `--features onnx`".into(),
        )),
    }
}
