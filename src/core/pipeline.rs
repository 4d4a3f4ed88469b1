//! One upload, start to finish.
//!
//! ```text
//! Idle -> Ingesting -> Separating -> Rendering -> Offering -> Done
//!              \            \                        \
//!               +------------+-----> Failed(stage, kind, reason)
//! ```
//!
//! Render problems never fail a request. Every artifact staged along the way
//! is released before the outcome is returned, on every path.

use std::{
    any::Any,
    fs,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread,
};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::Settings,
    core::{
        artifacts::{Artifact, ArtifactLedger, ArtifactStore, LedgerSnapshot},
        ingest::ingest,
        render::{ResultRenderer, SignalReport},
        service::SeparationService,
    },
    error::{ErrorKind, Result, SepError},
    types::{AudioBuffer, AudioSource, SeparationResult, StagingStrategy, UploadedAsset, WAV_MIME},
};

const SEPARATION_INPUT_NAME: &str = "separation_input.wav";

pub const ORIGINAL_LABEL: &str = "Original Signal";

pub fn download_name(index: usize) -> String {
    format!("separated_signal_{index}.wav")
}

pub fn separated_label(index: usize) -> String {
    format!("Separated Signal {index}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Separation,
    Offer,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    Ingesting,
    Separating,
    Rendering,
    Offering,
    Done,
    Failed {
        stage: Stage,
        kind: ErrorKind,
        reason: String,
    },
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed { .. })
    }
}

/// A separated output ready for download.
pub struct DownloadOffer<'a> {
    /// 1-based position in the separation result.
    pub index: usize,
    pub file_name: &'a str,
    pub mime_type: &'static str,
    pub artifact: &'a Artifact,
}

/// Receives download offers. Returning an error stops offering and fails the
/// request at the offer stage.
pub trait OfferSink {
    fn offer(&mut self, offer: &DownloadOffer<'_>) -> Result<()>;
}

/// Saves every offered artifact into a directory.
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SepError::artifact_io(dir.display(), e))?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl OfferSink for DirectorySink {
    fn offer(&mut self, offer: &DownloadOffer<'_>) -> Result<()> {
        let dest = self.dir.join(offer.file_name);
        let bytes = offer.artifact.read_bytes()?;
        fs::write(&dest, bytes).map_err(|e| SepError::artifact_io(dest.display(), e))?;
        self.written.push(dest);
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RenderFailure {
    pub label: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestOutcome {
    pub request_id: Uuid,
    pub upload_name: String,
    pub state: RequestState,
    pub transitions: Vec<RequestState>,
    pub original: Option<SignalReport>,
    pub separated: Vec<SignalReport>,
    pub render_failures: Vec<RenderFailure>,
    pub offered: Vec<String>,
    pub artifacts: LedgerSnapshot,
}

impl RequestOutcome {
    pub fn is_done(&self) -> bool {
        self.state == RequestState::Done
    }

    pub fn failure(&self) -> Option<(Stage, ErrorKind)> {
        match &self.state {
            RequestState::Failed { stage, kind, .. } => Some((*stage, *kind)),
            _ => None,
        }
    }
}

type Observer = Arc<dyn Fn(&RequestState) + Send + Sync>;

struct Failure {
    stage: Stage,
    error: SepError,
}

impl Failure {
    fn at(stage: Stage) -> impl FnOnce(SepError) -> Failure {
        move |error| Failure { stage, error }
    }
}

struct RequestRun {
    request_id: Uuid,
    observer: Option<Observer>,
    transitions: Vec<RequestState>,
    original: Option<SignalReport>,
    separated: Vec<SignalReport>,
    render_failures: Vec<RenderFailure>,
    offered: Vec<String>,
}

impl RequestRun {
    fn enter(&mut self, state: RequestState) {
        info!(state = ?state, "request state");
        if let Some(observer) = &self.observer {
            // Observers only watch; a panicking one never changes the outcome.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer(&state))) {
                warn!(reason = %panic_message(payload.as_ref()), "state observer panicked");
            }
        }
        self.transitions.push(state);
    }
}

/// Drives requests through the pipeline. Cheap to share; each call to
/// [`Orchestrator::process`] owns its own state.
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<Settings>,
    service: Arc<SeparationService>,
    renderer: Arc<dyn ResultRenderer>,
    observer: Option<Observer>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        service: Arc<SeparationService>,
        renderer: Arc<dyn ResultRenderer>,
    ) -> Self {
        Self {
            settings,
            service,
            renderer,
            observer: None,
        }
    }

    /// Called on every state transition, in order. Panics are logged and ignored.
    pub fn with_observer(mut self, observer: impl Fn(&RequestState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn service(&self) -> &Arc<SeparationService> {
        &self.service
    }

    pub fn process(&self, upload: &UploadedAsset, sink: &mut dyn OfferSink) -> RequestOutcome {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", id = %request_id, upload = %upload.name);
        let _guard = span.enter();

        let ledger = ArtifactLedger::new();
        let mut run = RequestRun {
            request_id,
            observer: self.observer.clone(),
            transitions: vec![RequestState::Idle],
            original: None,
            separated: Vec::new(),
            render_failures: Vec::new(),
            offered: Vec::new(),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(upload, sink, &ledger, &mut run)
        }));

        let state = match result {
            Ok(Ok(())) => RequestState::Done,
            Ok(Err(Failure { stage, error })) => {
                error!(?stage, kind = %error.kind(), error = %error, "request failed");
                RequestState::Failed {
                    stage,
                    kind: error.kind(),
                    reason: error.to_string(),
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(%reason, "request aborted by a panic");
                RequestState::Failed {
                    stage: Stage::Unknown,
                    kind: ErrorKind::Unexpected,
                    reason,
                }
            }
        };
        run.enter(state.clone());

        let artifacts = ledger.snapshot();
        if !artifacts.is_balanced() {
            warn!(?artifacts, "artifact ledger out of balance");
        }

        RequestOutcome {
            request_id,
            upload_name: upload.name.clone(),
            state,
            transitions: run.transitions,
            original: run.original,
            separated: run.separated,
            render_failures: run.render_failures,
            offered: run.offered,
            artifacts,
        }
    }

    fn run_stages(
        &self,
        upload: &UploadedAsset,
        sink: &mut dyn OfferSink,
        ledger: &Arc<ArtifactLedger>,
        run: &mut RequestRun,
    ) -> std::result::Result<(), Failure> {
        let mut store = ArtifactStore::new(
            self.settings.staging,
            self.settings.temp_dir.clone(),
            run.request_id,
            Arc::clone(ledger),
        );

        run.enter(RequestState::Ingesting);
        let original =
            ingest(upload, &self.settings, &mut store).map_err(Failure::at(Stage::Ingest))?;

        run.enter(RequestState::Separating);
        let separated = self
            .separate(upload, &mut store)
            .map_err(Failure::at(Stage::Separation))?;
        if separated.is_empty() {
            return Err(Failure {
                stage: Stage::Separation,
                error: SepError::Separation("model returned no sources".into()),
            });
        }

        run.enter(RequestState::Rendering);
        self.render(&original, &separated, run);

        run.enter(RequestState::Offering);
        self.offer(&separated, &mut store, sink, run)
            .map_err(Failure::at(Stage::Offer))?;

        Ok(())
    }

    fn separate(&self, upload: &UploadedAsset, store: &mut ArtifactStore) -> Result<SeparationResult> {
        let staged = match store.strategy() {
            StagingStrategy::TempFile => {
                Some(store.stage_bytes(SEPARATION_INPUT_NAME, upload.bytes().to_vec())?)
            }
            StagingStrategy::InMemory => None,
        };

        let source = match staged.as_ref().and_then(Artifact::path) {
            Some(path) => AudioSource::Path(path.to_path_buf()),
            None => AudioSource::Bytes(upload.bytes().to_vec()),
        };

        let result = self.separate_bounded(source);

        if let Some(artifact) = staged {
            if let Err(e) = artifact.release() {
                if result.is_ok() {
                    return Err(e);
                }
                warn!(error = %e, "failed to release separation input");
            }
        }
        result
    }

    /// Runs separation, on a worker thread when a timeout is configured. A
    /// timed-out worker is left to finish on its own.
    fn separate_bounded(&self, source: AudioSource) -> Result<SeparationResult> {
        let Some(limit) = self.settings.separation_timeout() else {
            return self.service.separate(&source);
        };

        let (tx, rx) = mpsc::channel();
        let service = Arc::clone(&self.service);
        thread::Builder::new()
            .name("separation".into())
            .spawn(move || {
                let _ = tx.send(service.separate(&source));
            })
            .map_err(|e| SepError::Separation(format!("failed to start separation worker: {e}")))?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SepError::Timeout(limit)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SepError::Separation(
                "separation worker exited without a result".into(),
            )),
        }
    }

    fn render(&self, original: &AudioBuffer, separated: &SeparationResult, run: &mut RequestRun) {
        let renderer = self.renderer.as_ref();

        match render_guarded(renderer, ORIGINAL_LABEL, original) {
            Ok(report) => run.original = Some(report),
            Err(e) => {
                warn!(label = ORIGINAL_LABEL, error = %e, "render failed");
                run.render_failures.push(RenderFailure {
                    label: ORIGINAL_LABEL.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        let results: Vec<(String, Result<SignalReport>)> = separated
            .sources
            .par_iter()
            .enumerate()
            .map(|(i, signal)| {
                let label = separated_label(i + 1);
                let report = render_guarded(renderer, &label, signal);
                (label, report)
            })
            .collect();

        for (label, result) in results {
            match result {
                Ok(report) => run.separated.push(report),
                Err(e) => {
                    warn!(%label, error = %e, "render failed");
                    run.render_failures.push(RenderFailure {
                        label,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn offer(
        &self,
        separated: &SeparationResult,
        store: &mut ArtifactStore,
        sink: &mut dyn OfferSink,
        run: &mut RequestRun,
    ) -> Result<()> {
        let mut staged: Vec<Artifact> = Vec::with_capacity(separated.len());
        for (i, signal) in separated.sources.iter().enumerate() {
            match store.stage(&download_name(i + 1), signal) {
                Ok(artifact) => staged.push(artifact),
                Err(e) => {
                    let _ = release_all(staged);
                    return Err(e);
                }
            }
        }

        let mut outcome = Ok(());
        for (i, artifact) in staged.iter().enumerate() {
            let offer = DownloadOffer {
                index: i + 1,
                file_name: artifact.name(),
                mime_type: WAV_MIME,
                artifact,
            };
            if let Err(e) = sink.offer(&offer) {
                outcome = Err(e);
                break;
            }
            run.offered.push(artifact.name().to_string());
        }

        if let Err(e) = release_all(staged) {
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
        outcome
    }
}

/// Releases every artifact, reporting the first failure.
fn release_all(artifacts: Vec<Artifact>) -> Result<()> {
    let mut first_err = None;
    for artifact in artifacts {
        if let Err(e) = artifact.release() {
            warn!(error = %e, "failed to release artifact");
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn render_guarded(
    renderer: &dyn ResultRenderer,
    label: &str,
    signal: &AudioBuffer,
) -> Result<SignalReport> {
    panic::catch_unwind(AssertUnwindSafe(|| renderer.render(label, signal)))
        .unwrap_or_else(|payload| Err(SepError::Render(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with a non-string payload".to_string()
    }
}
