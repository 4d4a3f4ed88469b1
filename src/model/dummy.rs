use std::sync::Arc;

use crate::{
    config::Settings,
    model::{ModelLoader, SeparationModel},
};

/// Deterministic stand-in that splits the mixture into frequency bands with
/// cascaded one-pole low-pass filters. The last source is the residual, so
/// the sources always sum back to the input.
#[derive(Clone, Debug)]
pub struct DummyModel {
    sources: usize,
}

impl DummyModel {
    pub fn new(sources: usize) -> Self {
        Self {
            sources: sources.max(1),
        }
    }
}

impl SeparationModel for DummyModel {
    fn separate(&self, mixture: &[f32], sample_rate: u32) -> anyhow::Result<Vec<Vec<f32>>> {
        if mixture.is_empty() {
            anyhow::bail!("empty mixture");
        }

        let mut residual = mixture.to_vec();
        let mut out = Vec::with_capacity(self.sources);

        for k in 0..self.sources - 1 {
            // Cutoffs climb an octave per band starting at 250 Hz.
            let cutoff = 250.0 * 2f32.powi(k as i32);
            let alpha = one_pole_alpha(cutoff, sample_rate);
            let mut state = 0.0f32;
            let band: Vec<f32> = residual
                .iter()
                .map(|&x| {
                    state += alpha * (x - state);
                    state
                })
                .collect();
            for (r, b) in residual.iter_mut().zip(&band) {
                *r -= b;
            }
            out.push(band);
        }
        out.push(residual);

        Ok(out)
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

fn one_pole_alpha(cutoff_hz: f32, sample_rate: u32) -> f32 {
    let dt = 1.0 / sample_rate.max(1) as f32;
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    dt / (rc + dt)
}

pub struct DummyLoader;

impl ModelLoader for DummyLoader {
    fn load(&self, settings: &Settings) -> anyhow::Result<Arc<dyn SeparationModel>> {
        Ok(Arc::new(DummyModel::new(settings.expected_source_count)))
    }

    fn name(&self) -> &'static str {
        "dummy"
    }
}
