use crate::error::{Result, SepError};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub fn models_cache_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    let proj = ProjectDirs::from("dev", "SpeechSeparation", "speech-separation-core")
        .ok_or(SepError::CacheDirUnavailable)?;
    let mut p = PathBuf::from(proj.cache_dir());
    p.push("models");
    Ok(p)
}
