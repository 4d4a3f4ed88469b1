use crate::{
    error::{Result, SepError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
        paths::models_cache_dir,
    },
};

use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Describes an exported separation model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub sample_rate: u32,
    pub sources: usize,
    #[serde(default)]
    pub input_name: Option<String>,
    pub artifacts: Vec<ModelArtifact>,
}

impl ModelManifest {
    pub fn resolve_primary_artifact(&self) -> std::result::Result<&ModelArtifact, String> {
        let a = self
            .artifacts
            .first()
            .ok_or_else(|| format!("manifest `{}` lists no artifacts", self.name))?;
        if a.sha256.len() < 8 || !a.sha256.is_ascii() {
            return Err(format!("artifact `{}` has no usable sha256", a.file));
        }
        Ok(a)
    }
}

#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Fetches the manifest at `manifest_url` and makes sure the model file it
/// names is present in the cache with the expected checksum.
pub fn ensure_model(manifest_url: &str, cache_dir: Option<&Path>) -> Result<ModelHandle> {
    let client = http_client()?;
    let manifest: ModelManifest = client
        .get(manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(SepError::Manifest)?;

    let cache_dir = models_cache_dir(cache_dir)?;
    fs::create_dir_all(&cache_dir)?;
    let ext = a
        .file
        .rsplit_once('.')
        .map(|(_, e)| format!(".{e}"))
        .unwrap_or_default();
    let file_name = format!("{}-{}{}", manifest.name, &a.sha256[..8], ext);
    let local_path = cache_dir.join(file_name);

    let need_download = !matches!(verify_sha256(&local_path, &a.sha256), Ok(true));
    if need_download {
        info!(model = %manifest.name, url = %a.url, "downloading model");
        download_with_progress(&client, &a.url, &local_path)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            fs::remove_file(&local_path).ok();
            return Err(SepError::Checksum {
                path: local_path.display().to_string(),
            });
        }
        if a.size_bytes > 0 {
            let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
            if size != a.size_bytes {
                warn!(
                    path = %local_path.display(),
                    expected = a.size_bytes,
                    got = size,
                    "model size mismatch"
                );
            }
        }
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}
