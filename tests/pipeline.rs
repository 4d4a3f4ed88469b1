mod common;

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use approx::assert_relative_eq;
use common::{settings, two_speaker_wav, CountingLoader, SleepyLoader};
use speech_separation_core::{
    core::pipeline::{separated_label, ORIGINAL_LABEL},
    decode_wav_bytes, download_name, AudioBuffer, DirectorySink, DownloadOffer, ErrorKind,
    ModelLoader, OfferSink, Orchestrator, RequestState, ResultRenderer, SepError,
    SeparationService, Settings, SignalReport, Stage, StagingStrategy, SummaryRenderer,
    UploadedAsset,
};
use tempfile::tempdir;

/// Keeps everything it is offered, plus where the artifact lived at the time.
#[derive(Default)]
struct CollectingSink {
    offers: Vec<(usize, String, &'static str, Vec<u8>, Option<PathBuf>)>,
}

impl OfferSink for CollectingSink {
    fn offer(&mut self, offer: &DownloadOffer<'_>) -> speech_separation_core::Result<()> {
        self.offers.push((
            offer.index,
            offer.file_name.to_string(),
            offer.mime_type,
            offer.artifact.read_bytes()?,
            offer.artifact.path().map(|p| p.to_path_buf()),
        ));
        Ok(())
    }
}

struct PanickingSink;

impl OfferSink for PanickingSink {
    fn offer(&mut self, _offer: &DownloadOffer<'_>) -> speech_separation_core::Result<()> {
        panic!("sink blew up mid-download");
    }
}

struct BrokenSink;

impl OfferSink for BrokenSink {
    fn offer(&mut self, offer: &DownloadOffer<'_>) -> speech_separation_core::Result<()> {
        Err(SepError::ArtifactIo {
            path: offer.file_name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client went away"),
        })
    }
}

/// Fails for one label, renders everything else normally.
struct PickyRenderer {
    refuse: String,
    panic: bool,
}

impl ResultRenderer for PickyRenderer {
    fn render(&self, label: &str, signal: &AudioBuffer) -> speech_separation_core::Result<SignalReport> {
        if label == self.refuse {
            if self.panic {
                panic!("chart backend crashed");
            }
            return Err(SepError::Render("no display".into()));
        }
        SummaryRenderer::default().render(label, signal)
    }
}

fn orchestrator(settings: Settings, loader: Arc<dyn ModelLoader>) -> Orchestrator {
    let settings = Arc::new(settings);
    let service = Arc::new(SeparationService::new(Arc::clone(&settings), loader));
    Orchestrator::new(settings, service, Arc::new(SummaryRenderer::default()))
}

fn temp_settings(root: &tempfile::TempDir, staging: StagingStrategy) -> Settings {
    Settings {
        temp_dir: Some(root.path().to_path_buf()),
        ..settings(staging)
    }
}

fn upload() -> UploadedAsset {
    UploadedAsset::new("meeting.wav", "audio/wav", two_speaker_wav(16_000, 4.0))
}

fn staging_root_is_empty(root: &tempfile::TempDir) -> bool {
    std::fs::read_dir(root.path()).unwrap().next().is_none()
}

#[test]
fn two_speaker_upload_is_separated_and_offered() {
    for staging in [StagingStrategy::InMemory, StagingStrategy::TempFile] {
        let root = tempdir().unwrap();
        let orch = orchestrator(temp_settings(&root, staging), CountingLoader::new());
        let mut sink = CollectingSink::default();

        let outcome = orch.process(&upload(), &mut sink);

        assert!(outcome.is_done(), "{staging:?}: {:?}", outcome.state);
        assert_eq!(
            outcome.transitions,
            vec![
                RequestState::Idle,
                RequestState::Ingesting,
                RequestState::Separating,
                RequestState::Rendering,
                RequestState::Offering,
                RequestState::Done,
            ]
        );

        let original = outcome.original.as_ref().unwrap();
        assert_eq!(original.label, ORIGINAL_LABEL);
        assert_eq!(original.sample_rate, 16_000);
        assert_relative_eq!(original.duration_secs, 4.0, max_relative = 0.01);

        assert_eq!(outcome.separated.len(), 2);
        for (i, report) in outcome.separated.iter().enumerate() {
            assert_eq!(report.label, separated_label(i + 1));
            assert_eq!(report.sample_rate, 8_000);
            assert_relative_eq!(report.duration_secs, 4.0, max_relative = 0.05);
            assert_eq!(report.spectrogram.sample_rate, 8_000);
        }
        assert!(outcome.render_failures.is_empty());

        assert_eq!(outcome.offered, vec![download_name(1), download_name(2)]);
        assert_eq!(sink.offers.len(), 2);
        for (n, (index, name, mime, bytes, path)) in sink.offers.iter().enumerate() {
            assert_eq!(*index, n + 1);
            assert_eq!(name, &format!("separated_signal_{}.wav", n + 1));
            assert_eq!(*mime, "audio/wav");
            let decoded = decode_wav_bytes(bytes).unwrap();
            assert_eq!(decoded.sample_rate, 8_000);
            assert_eq!(decoded.channels, 1);
            if let Some(path) = path {
                assert!(!path.exists(), "{} outlived the request", path.display());
            }
        }

        assert!(outcome.artifacts.is_balanced());
        let expected_staged = match staging {
            // Two offered outputs.
            StagingStrategy::InMemory => 2,
            // Plus the ingested upload and the separation input.
            StagingStrategy::TempFile => 4,
        };
        assert_eq!(outcome.artifacts.staged, expected_staged);
        assert!(staging_root_is_empty(&root));
    }
}

#[test]
fn directory_sink_receives_named_wav_files() {
    let out = tempdir().unwrap();
    let orch = orchestrator(settings(StagingStrategy::InMemory), CountingLoader::new());
    let mut sink = DirectorySink::new(out.path()).unwrap();

    let outcome = orch.process(&upload(), &mut sink);
    assert!(outcome.is_done());

    assert_eq!(
        sink.written(),
        &[
            out.path().join("separated_signal_1.wav"),
            out.path().join("separated_signal_2.wav"),
        ]
    );
    for path in sink.written() {
        let decoded = speech_separation_core::read_audio(path).unwrap();
        assert_eq!(decoded.sample_rate, 8_000);
    }
}

#[test]
fn non_audio_upload_fails_at_ingest_without_loading_the_model() {
    for staging in [StagingStrategy::InMemory, StagingStrategy::TempFile] {
        let root = tempdir().unwrap();
        let loader = CountingLoader::new();
        let orch = orchestrator(temp_settings(&root, staging), loader.clone());
        let mut sink = CollectingSink::default();
        let upload = UploadedAsset::new("notes.wav", "audio/wav", b"hello, not audio".to_vec());

        let outcome = orch.process(&upload, &mut sink);

        assert_eq!(outcome.failure(), Some((Stage::Ingest, ErrorKind::Decode)));
        assert_eq!(
            outcome.transitions,
            vec![
                RequestState::Idle,
                RequestState::Ingesting,
                outcome.state.clone(),
            ]
        );
        assert_eq!(loader.load_count(), 0);
        assert!(outcome.original.is_none());
        assert!(outcome.separated.is_empty());
        assert!(sink.offers.is_empty());
        assert!(outcome.artifacts.is_balanced());
        if staging == StagingStrategy::InMemory {
            assert_eq!(outcome.artifacts.staged, 0);
        }
        assert!(staging_root_is_empty(&root));
    }
}

#[test]
fn oversized_upload_is_rejected() {
    let s = Settings {
        max_upload_bytes: 1_024,
        ..settings(StagingStrategy::InMemory)
    };
    let orch = orchestrator(s, CountingLoader::new());
    let outcome = orch.process(&upload(), &mut CollectingSink::default());
    assert_eq!(outcome.failure(), Some((Stage::Ingest, ErrorKind::UploadRejected)));
}

#[test]
fn model_failure_is_reported_and_the_next_request_recovers() {
    let root = tempdir().unwrap();
    let loader = CountingLoader::failing(1);
    let orch = orchestrator(
        temp_settings(&root, StagingStrategy::TempFile),
        loader.clone(),
    );

    let mut sink = CollectingSink::default();
    let first = orch.process(&upload(), &mut sink);
    assert_eq!(
        first.failure(),
        Some((Stage::Separation, ErrorKind::ModelUnavailable))
    );
    assert!(sink.offers.is_empty());
    assert!(first.artifacts.is_balanced());
    assert!(staging_root_is_empty(&root));

    let second = orch.process(&upload(), &mut sink);
    assert!(second.is_done(), "{:?}", second.state);
    assert_eq!(sink.offers.len(), 2);
    assert_eq!(loader.load_count(), 2);
    assert_ne!(first.request_id, second.request_id);
}

#[test]
fn render_errors_do_not_fail_the_request() {
    for staging in [StagingStrategy::InMemory, StagingStrategy::TempFile] {
        for panic in [false, true] {
            let root = tempdir().unwrap();
            let settings = Arc::new(temp_settings(&root, staging));
            let service = Arc::new(SeparationService::new(
                Arc::clone(&settings),
                CountingLoader::new(),
            ));
            let renderer = PickyRenderer {
                refuse: separated_label(1),
                panic,
            };
            let orch = Orchestrator::new(settings, service, Arc::new(renderer));
            let mut sink = CollectingSink::default();

            let outcome = orch.process(&upload(), &mut sink);

            assert!(outcome.is_done(), "{staging:?} panic={panic}: {:?}", outcome.state);
            assert!(outcome.original.is_some());
            assert_eq!(outcome.separated.len(), 1);
            assert_eq!(outcome.separated[0].label, separated_label(2));
            assert_eq!(outcome.render_failures.len(), 1);
            assert_eq!(outcome.render_failures[0].label, separated_label(1));
            // Downloads are independent of rendering.
            assert_eq!(sink.offers.len(), 2);
            assert!(outcome.artifacts.is_balanced(), "{:?}", outcome.artifacts);
            assert!(staging_root_is_empty(&root));
        }
    }
}

#[test]
fn sink_failure_fails_the_offer_stage_and_cleans_up() {
    let root = tempdir().unwrap();
    let orch = orchestrator(
        temp_settings(&root, StagingStrategy::TempFile),
        CountingLoader::new(),
    );

    let outcome = orch.process(&upload(), &mut BrokenSink);

    assert_eq!(outcome.failure(), Some((Stage::Offer, ErrorKind::ArtifactIo)));
    assert!(outcome.offered.is_empty());
    assert_eq!(outcome.separated.len(), 2);
    assert!(outcome.artifacts.is_balanced());
    assert!(staging_root_is_empty(&root));
}

#[test]
fn panic_inside_a_stage_is_unexpected_and_releases_artifacts() {
    let root = tempdir().unwrap();
    let orch = orchestrator(
        temp_settings(&root, StagingStrategy::TempFile),
        CountingLoader::new(),
    );

    let outcome = orch.process(&upload(), &mut PanickingSink);

    assert_eq!(outcome.failure(), Some((Stage::Unknown, ErrorKind::Unexpected)));
    match &outcome.state {
        RequestState::Failed { reason, .. } => assert!(reason.contains("sink blew up")),
        other => panic!("expected a failure, got {other:?}"),
    }
    assert!(outcome.offered.is_empty());
    assert_eq!(outcome.artifacts.staged, 4);
    assert!(outcome.artifacts.is_balanced(), "{:?}", outcome.artifacts);
    assert!(staging_root_is_empty(&root));
}

#[test]
fn panicking_observer_does_not_change_the_outcome() {
    let orch = orchestrator(settings(StagingStrategy::InMemory), CountingLoader::new())
        .with_observer(|state| panic!("observer cannot handle {state:?}"));

    let outcome = orch.process(&upload(), &mut CollectingSink::default());

    assert!(outcome.is_done(), "{:?}", outcome.state);
    assert_eq!(outcome.transitions.len(), 6);
}

#[test]
fn slow_separation_times_out() {
    let root = tempdir().unwrap();
    let s = Settings {
        separation_timeout_secs: Some(1),
        ..temp_settings(&root, StagingStrategy::TempFile)
    };
    let orch = orchestrator(s, Arc::new(SleepyLoader(Duration::from_secs(3))));

    let outcome = orch.process(&upload(), &mut CollectingSink::default());

    assert_eq!(outcome.failure(), Some((Stage::Separation, ErrorKind::Timeout)));
    assert!(outcome.artifacts.is_balanced());
}

#[test]
fn wrong_source_count_fails_separation() {
    let orch = orchestrator(
        settings(StagingStrategy::InMemory),
        CountingLoader::with_sources(3),
    );
    let mut sink = CollectingSink::default();

    let outcome = orch.process(&upload(), &mut sink);

    assert_eq!(outcome.failure(), Some((Stage::Separation, ErrorKind::Separation)));
    assert!(sink.offers.is_empty());
}

#[test]
fn observer_sees_every_transition_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let orch = orchestrator(settings(StagingStrategy::InMemory), CountingLoader::new())
        .with_observer(move |state| recorder.lock().unwrap().push(state.clone()));

    let outcome = orch.process(&upload(), &mut CollectingSink::default());

    let seen = seen.lock().unwrap();
    // Idle is the starting point, not a transition.
    assert_eq!(seen.as_slice(), &outcome.transitions[1..]);
    assert!(seen.last().unwrap().is_terminal());
}

#[test]
fn outcome_serialises_for_reports() {
    let orch = orchestrator(settings(StagingStrategy::InMemory), CountingLoader::new());
    let outcome = orch.process(
        &UploadedAsset::new("x.txt", "text/plain", b"plain text".to_vec()),
        &mut CollectingSink::default(),
    );

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["state"]["state"], "failed");
    assert_eq!(json["state"]["stage"], "ingest");
    assert_eq!(json["state"]["kind"], "decode");
}
