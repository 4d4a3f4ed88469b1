mod common;

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use approx::assert_relative_eq;
use common::{settings, two_speaker_samples, two_speaker_wav, wav_bytes, CountingLoader};
use speech_separation_core::{
    AudioSource, DummyLoader, SepError, SeparationService, StagingStrategy,
};
use tempfile::tempdir;

fn service_with(loader: Arc<CountingLoader>) -> SeparationService {
    SeparationService::new(Arc::new(settings(StagingStrategy::InMemory)), loader)
}

#[test]
fn same_input_twice_gives_two_sources_at_output_rate() {
    let service = SeparationService::new(
        Arc::new(settings(StagingStrategy::InMemory)),
        Arc::new(DummyLoader),
    );
    let source = AudioSource::Bytes(two_speaker_wav(16_000, 2.0));

    for _ in 0..2 {
        let result = service.separate(&source).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.sample_rate, 8_000);
        for s in &result.sources {
            assert_eq!(s.sample_rate(), 8_000);
            assert_relative_eq!(s.duration_secs(), 2.0, max_relative = 0.05);
        }
    }
}

#[test]
fn path_and_bytes_sources_agree() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mix.wav");
    let bytes = two_speaker_wav(8_000, 1.0);
    std::fs::write(&path, &bytes).unwrap();

    let service = service_with(CountingLoader::new());
    let from_path = service.separate(&AudioSource::Path(path)).unwrap();
    let from_bytes = service.separate(&AudioSource::Bytes(bytes)).unwrap();

    assert_eq!(from_path.sources.len(), from_bytes.sources.len());
    for (a, b) in from_path.sources.iter().zip(&from_bytes.sources) {
        assert_eq!(a.samples(), b.samples());
    }
}

#[test]
fn concurrent_first_requests_initialise_once() {
    let loader = CountingLoader::slow(Duration::from_millis(200));
    let service = Arc::new(service_with(loader.clone()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let model = service.handle().unwrap();
                Arc::as_ptr(&model) as *const () as usize
            })
        })
        .collect();

    let ptrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(loader.load_count(), 1);
    assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    assert!(service.is_ready());
}

#[test]
fn failed_initialisation_is_retried_on_next_use() {
    let loader = CountingLoader::failing(1);
    let service = service_with(loader.clone());
    let source = AudioSource::Bytes(two_speaker_wav(8_000, 0.5));

    let err = service.separate(&source).unwrap_err();
    match err {
        SepError::ModelUnavailable(reason) => assert!(reason.contains("weights not found")),
        other => panic!("expected ModelUnavailable, got {other:?}"),
    }
    assert!(!service.is_ready());

    let result = service.separate(&source).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(loader.load_count(), 2);

    // Initialised now; no further loads.
    service.separate(&source).unwrap();
    assert_eq!(loader.load_count(), 2);
}

#[test]
fn wrong_source_count_is_a_separation_error() {
    let service = service_with(CountingLoader::with_sources(3));
    let err = service
        .separate(&AudioSource::Bytes(two_speaker_wav(8_000, 0.5)))
        .unwrap_err();
    assert!(matches!(err, SepError::Separation(_)), "{err:?}");
}

#[test]
fn silent_input_is_refused() {
    let service = service_with(CountingLoader::new());
    let silence = wav_bytes(&vec![0.0; 8_000], 8_000, 1);
    let err = service.separate(&AudioSource::Bytes(silence)).unwrap_err();
    assert!(matches!(err, SepError::Separation(_)), "{err:?}");
}

#[test]
fn undecodable_input_never_reaches_the_model() {
    let service = service_with(CountingLoader::new());
    let err = service
        .separate(&AudioSource::Bytes(b"not audio".to_vec()))
        .unwrap_err();
    assert!(matches!(err, SepError::Decode(_)), "{err:?}");
}

#[test]
fn stereo_input_is_separated_as_mono() {
    let service = service_with(CountingLoader::new());
    let stereo = wav_bytes(&two_speaker_samples(16_000, 1.0), 16_000, 2);
    let result = service.separate(&AudioSource::Bytes(stereo)).unwrap();
    assert_eq!(result.sources[0].len(), 8_000);
}
