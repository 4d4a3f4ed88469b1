use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Result, SepError},
    types::StagingStrategy,
};

pub const ENV_PREFIX: &str = "SPEECH_SEP_";

/// Runtime settings. Every field can come from a TOML file, a
/// `SPEECH_SEP_*` environment variable, or the CLI, in that order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_model_id")]
    pub model_id: String,
    #[serde(default = "Settings::default_output_sample_rate")]
    pub output_sample_rate: u32,
    #[serde(default = "Settings::default_expected_source_count")]
    pub expected_source_count: usize,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub staging: StagingStrategy,
    #[serde(default = "Settings::default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separation_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub python: PythonSettings,
    #[serde(default)]
    pub onnx: OnnxSettings,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Python,
    Onnx,
    Dummy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PythonSettings {
    #[serde(default = "PythonSettings::default_interpreter")]
    pub interpreter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OnnxSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    fn default_model_id() -> String {
        "speechbrain/sepformer-wsj02mix".to_string()
    }

    const fn default_output_sample_rate() -> u32 {
        8000
    }

    const fn default_expected_source_count() -> usize {
        2
    }

    const fn default_max_upload_bytes() -> usize {
        50 * 1024 * 1024
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        settings.apply_env_from(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SepError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SepError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SepError::Config(e.to_string()))
    }

    /// Applies `SPEECH_SEP_*` overrides using `lookup` to resolve variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            let value = lookup(&key).filter(|v| !v.trim().is_empty());
            if value.is_some() {
                debug!(%key, "config override from environment");
            }
            value
        };

        if let Some(v) = var("MODEL_ID") {
            self.model_id = v;
        }
        if let Some(v) = var("OUTPUT_SAMPLE_RATE") {
            self.output_sample_rate = parse_num("OUTPUT_SAMPLE_RATE", &v)?;
        }
        if let Some(v) = var("EXPECTED_SOURCE_COUNT") {
            self.expected_source_count = parse_num("EXPECTED_SOURCE_COUNT", &v)?;
        }
        if let Some(v) = var("BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = var("STAGING") {
            self.staging = v.parse()?;
        }
        if let Some(v) = var("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_num("MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = var("TIMEOUT_SECS") {
            self.separation_timeout_secs = Some(parse_num("TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("TMP_DIR") {
            self.temp_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PYTHON") {
            self.python.interpreter = v;
        }
        if let Some(v) = var("PYTHON_SCRIPT") {
            self.python.script = Some(PathBuf::from(v));
        }
        if let Some(v) = var("MANIFEST_URL") {
            self.onnx.manifest_url = Some(v);
        }
        if let Some(v) = var("CACHE_DIR") {
            self.onnx.cache_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(SepError::Config("model_id must not be empty".into()));
        }
        if self.output_sample_rate == 0 {
            return Err(SepError::Config("output_sample_rate must be positive".into()));
        }
        if self.expected_source_count == 0 {
            return Err(SepError::Config(
                "expected_source_count must be at least 1".into(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(SepError::Config("max_upload_bytes must be positive".into()));
        }
        if self.separation_timeout_secs == Some(0) {
            return Err(SepError::Config(
                "separation_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn separation_timeout(&self) -> Option<Duration> {
        self.separation_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_id: Self::default_model_id(),
            output_sample_rate: Self::default_output_sample_rate(),
            expected_source_count: Self::default_expected_source_count(),
            backend: Backend::default(),
            staging: StagingStrategy::default(),
            max_upload_bytes: Self::default_max_upload_bytes(),
            separation_timeout_secs: None,
            temp_dir: None,
            python: PythonSettings::default(),
            onnx: OnnxSettings::default(),
        }
    }
}

impl PythonSettings {
    fn default_interpreter() -> String {
        "python3".to_string()
    }

    pub fn script_path(&self) -> PathBuf {
        self.script.clone().unwrap_or_else(|| {
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("scripts")
                .join("sepformer_runner.py")
        })
    }
}

impl Default for PythonSettings {
    fn default() -> Self {
        Self {
            interpreter: Self::default_interpreter(),
            script: None,
        }
    }
}

impl FromStr for Backend {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python" => Ok(Backend::Python),
            "onnx" => Ok(Backend::Onnx),
            "dummy" => Ok(Backend::Dummy),
            other => Err(SepError::Config(format!("unknown backend `{other}`"))),
        }
    }
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SepError::Config(format!("{ENV_PREFIX}{name}: `{value}` is not a number")))
}
