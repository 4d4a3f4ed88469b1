use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::info;

use crate::{
    config::Settings,
    model::{
        model_manager::{ensure_model, ModelHandle},
        ModelLoader, SeparationModel,
    },
};

const DEFAULT_INPUT_NAME: &str = "mixture";

/// ONNX export of a separation network. Expects a `[1, T]` mixture and
/// returns either `[1, T, N]` or `[1, N, T]`.
pub struct OnnxModel {
    name: String,
    input_name: String,
    sample_rate: u32,
    sources: usize,
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn from_handle(h: &ModelHandle) -> anyhow::Result<Self> {
        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create ORT session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to configure ORT session: {e}"))?
            .commit_from_file(&h.local_path)
            .map_err(|e| anyhow!("Failed to load ONNX model {}: {e}", h.local_path.display()))?;

        Ok(Self {
            name: h.manifest.name.clone(),
            input_name: h
                .manifest
                .input_name
                .clone()
                .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string()),
            sample_rate: h.manifest.sample_rate,
            sources: h.manifest.sources,
            session: Mutex::new(session),
        })
    }
}

impl SeparationModel for OnnxModel {
    fn separate(&self, mixture: &[f32], sample_rate: u32) -> anyhow::Result<Vec<Vec<f32>>> {
        if sample_rate != self.sample_rate {
            return Err(anyhow!(
                "model runs at {} Hz, got {} Hz",
                self.sample_rate,
                sample_rate
            ));
        }
        let t = mixture.len();
        let input = Tensor::from_array((vec![1usize, t], mixture.to_vec()))
            .context("mixture tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| anyhow!("Inference failed: {e}"))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("Model produced no output"))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract output: {e}"))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        split_sources(&dims, data, self.sources)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn split_sources(dims: &[usize], data: &[f32], sources: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    if dims.iter().product::<usize>() != data.len() || data.is_empty() {
        return Err(anyhow!(
            "Output shape {:?} does not match {} values",
            dims,
            data.len()
        ));
    }
    match dims {
        // [1, T, N]
        [1, t, n] if *n == sources => Ok((0..*n)
            .map(|s| (0..*t).map(|i| data[i * n + s]).collect())
            .collect()),
        // [1, N, T]
        [1, n, t] if *n == sources => Ok(data.chunks_exact(*t).map(<[f32]>::to_vec).collect()),
        other => Err(anyhow!(
            "Unexpected output shape {:?} for {} sources",
            other,
            sources
        )),
    }
}

pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, settings: &Settings) -> anyhow::Result<Arc<dyn SeparationModel>> {
        let url = settings
            .onnx
            .manifest_url
            .as_deref()
            .ok_or_else(|| anyhow!("onnx.manifest_url is not configured"))?;
        let handle = ensure_model(url, settings.onnx.cache_dir.as_deref())?;

        if handle.manifest.sample_rate != settings.output_sample_rate {
            return Err(anyhow!(
                "manifest sample rate {} does not match output_sample_rate {}",
                handle.manifest.sample_rate,
                settings.output_sample_rate
            ));
        }
        if handle.manifest.sources != settings.expected_source_count {
            return Err(anyhow!(
                "manifest declares {} sources, expected {}",
                handle.manifest.sources,
                settings.expected_source_count
            ));
        }

        let model = OnnxModel::from_handle(&handle)?;
        info!(model = %model.name, path = %handle.local_path.display(), "onnx session ready");
        Ok(Arc::new(model))
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
