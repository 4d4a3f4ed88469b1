//! Request-scoped staging of encoded audio.
//!
//! Every [`Artifact`] handed out by an [`ArtifactStore`] is released exactly
//! once: explicitly through [`Artifact::release`] or, on any other exit path,
//! when it is dropped. The shared [`ArtifactLedger`] counts both sides so a
//! request can prove it left nothing behind.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    core::audio::encode_wav_bytes,
    error::{Result, SepError},
    types::{AudioBuffer, StagingStrategy},
};

#[derive(Debug, Default)]
pub struct ArtifactLedger {
    staged: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub staged: usize,
    pub released: usize,
}

impl ArtifactLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            staged: self.staged.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }
}

impl LedgerSnapshot {
    pub fn outstanding(&self) -> usize {
        self.staged.saturating_sub(self.released)
    }

    pub fn is_balanced(&self) -> bool {
        self.staged == self.released
    }
}

enum Location {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// One staged, self-contained WAV payload.
pub struct Artifact {
    name: String,
    location: Location,
    ledger: Arc<ArtifactLedger>,
    released: bool,
}

impl Artifact {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path when staged as a temp file.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(p) => Some(p),
            Location::Memory(_) => None,
        }
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match &self.location {
            Location::File(p) => fs::read(p).map_err(|e| SepError::artifact_io(p.display(), e)),
            Location::Memory(b) => Ok(b.clone()),
        }
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
        match &self.location {
            Location::File(p) => {
                debug!(artifact = %self.name, "releasing staged file");
                fs::remove_file(p).map_err(|e| SepError::artifact_io(p.display(), e))
            }
            Location::Memory(_) => Ok(()),
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
        if let Location::File(p) = &self.location {
            if let Err(e) = fs::remove_file(p) {
                warn!(artifact = %self.name, error = %e, "failed to remove staged file on drop");
            }
        }
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("path", &self.path())
            .field("released", &self.released)
            .finish()
    }
}

/// Hands out artifacts for a single request. With the temp-file strategy they
/// live in a directory named after the request id, removed when the store
/// goes away.
pub struct ArtifactStore {
    strategy: StagingStrategy,
    root: Option<PathBuf>,
    request_id: Uuid,
    dir: Option<TempDir>,
    ledger: Arc<ArtifactLedger>,
}

impl ArtifactStore {
    pub fn new(
        strategy: StagingStrategy,
        root: Option<PathBuf>,
        request_id: Uuid,
        ledger: Arc<ArtifactLedger>,
    ) -> Self {
        Self {
            strategy,
            root,
            request_id,
            dir: None,
            ledger,
        }
    }

    pub fn strategy(&self) -> StagingStrategy {
        self.strategy
    }

    pub fn ledger(&self) -> &Arc<ArtifactLedger> {
        &self.ledger
    }

    pub fn stage(&mut self, name: &str, audio: &AudioBuffer) -> Result<Artifact> {
        let bytes = encode_wav_bytes(audio)
            .map_err(|e| SepError::artifact_io(name, io::Error::new(io::ErrorKind::Other, e)))?;
        self.stage_bytes(name, bytes)
    }

    pub fn stage_bytes(&mut self, name: &str, bytes: Vec<u8>) -> Result<Artifact> {
        if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name) {
            return Err(SepError::artifact_io(
                name,
                io::Error::new(io::ErrorKind::InvalidInput, "artifact name must be a bare file name"),
            ));
        }

        let location = match self.strategy {
            StagingStrategy::InMemory => Location::Memory(bytes),
            StagingStrategy::TempFile => {
                let path = self.dir()?.join(name);
                write_new(&path, &bytes).map_err(|e| SepError::artifact_io(path.display(), e))?;
                Location::File(path)
            }
        };

        self.ledger.staged.fetch_add(1, Ordering::SeqCst);
        debug!(artifact = name, request = %self.request_id, "staged artifact");

        Ok(Artifact {
            name: name.to_string(),
            location,
            ledger: Arc::clone(&self.ledger),
            released: false,
        })
    }

    fn dir(&mut self) -> Result<&Path> {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => {
                let prefix = format!("speech-sep-{}-", self.request_id);
                let mut builder = tempfile::Builder::new();
                builder.prefix(&prefix);
                let created = match &self.root {
                    Some(root) => {
                        fs::create_dir_all(root)
                            .map_err(|e| SepError::artifact_io(root.display(), e))?;
                        builder.tempdir_in(root)
                    }
                    None => builder.tempdir(),
                };
                created.map_err(|e| SepError::artifact_io(&prefix, e))?
            }
        };
        Ok(self.dir.insert(dir).path())
    }

    /// Directory holding staged files, if one was created.
    pub fn staging_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.flush()
}
