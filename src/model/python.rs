use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use tempfile::tempdir;
use tracing::{debug, info};

use crate::{
    config::Settings,
    core::audio::{read_audio, write_audio},
    model::{ModelLoader, SeparationModel},
    types::AudioBuffer,
};

/// Runs separation through an external runner script:
///
/// ```text
/// <interpreter> <script> --model <id> --prepare
/// <interpreter> <script> --model <id> --input in.wav --output <dir> --sources <n>
/// ```
///
/// The runner writes `source_1.wav` .. `source_<n>.wav` into `<dir>`.
pub struct PythonModel {
    interpreter: String,
    script: PathBuf,
    model_id: String,
    sources: usize,
}

impl PythonModel {
    pub fn new(interpreter: impl Into<String>, script: PathBuf, model_id: &str, sources: usize) -> Self {
        Self {
            interpreter: interpreter.into(),
            script,
            model_id: model_id.to_string(),
            sources,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script).arg("--model").arg(&self.model_id);
        cmd
    }

    /// Downloads and caches the pretrained weights.
    pub fn prepare(&self) -> Result<()> {
        let output = self
            .command()
            .arg("--prepare")
            .output()
            .with_context(|| format!("Failed to run {}", self.interpreter))?;

        if !output.status.success() {
            return Err(anyhow!(
                "runner could not prepare `{}`: {}",
                self.model_id,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

impl SeparationModel for PythonModel {
    fn separate(&self, mixture: &[f32], sample_rate: u32) -> Result<Vec<Vec<f32>>> {
        let work = tempdir().context("Failed to create runner work dir")?;
        let input_wav = work.path().join("input.wav");
        let output_dir = work.path().join("out");
        fs::create_dir_all(&output_dir)?;

        let input = AudioBuffer::new(mixture.to_vec(), sample_rate)?;
        write_audio(&input_wav, &input)?;

        debug!(input = %input_wav.display(), output = %output_dir.display(), "invoking runner");

        let output = self
            .command()
            .arg("--input")
            .arg(&input_wav)
            .arg("--output")
            .arg(&output_dir)
            .arg("--sources")
            .arg(self.sources.to_string())
            .output()
            .context("Failed to run separation runner script")?;

        if !output.status.success() {
            return Err(anyhow!(
                "separation runner failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        (1..=self.sources)
            .map(|i| read_source(&output_dir.join(format!("source_{i}.wav")), sample_rate))
            .collect()
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}

fn read_source(path: &Path, expected_rate: u32) -> Result<Vec<f32>> {
    let decoded = read_audio(path).with_context(|| format!("Missing runner output {}", path.display()))?;
    if decoded.sample_rate != expected_rate {
        return Err(anyhow!(
            "{} is at {} Hz, expected {} Hz",
            path.display(),
            decoded.sample_rate,
            expected_rate
        ));
    }
    Ok(decoded.into_mono()?.into_samples())
}

pub struct PythonRunnerLoader;

impl ModelLoader for PythonRunnerLoader {
    fn load(&self, settings: &Settings) -> Result<Arc<dyn SeparationModel>> {
        let script = settings.python.script_path();
        if !script.exists() {
            return Err(anyhow!("runner script not found: {}", script.display()));
        }

        let model = PythonModel::new(
            settings.python.interpreter.clone(),
            script,
            &settings.model_id,
            settings.expected_source_count,
        );
        model.prepare()?;

        info!(model = %settings.model_id, "python runner ready");
        Ok(Arc::new(model))
    }

    fn name(&self) -> &'static str {
        "python"
    }
}
