//! # speech-separation-core
//!
//! Takes an uploaded multi-speaker WAV recording, runs a pretrained
//! separation model over it and hands back one track per speaker, together
//! with waveform/spectrogram summaries and downloadable WAV artifacts.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod types;

pub use crate::{
    config::{Backend, Settings},
    core::{
        artifacts::{Artifact, ArtifactLedger, ArtifactStore, LedgerSnapshot},
        audio::{decode_wav_bytes, encode_wav_bytes, read_audio, write_audio, DecodedAudio},
        ingest::ingest,
        pipeline::{
            download_name, DirectorySink, DownloadOffer, OfferSink, Orchestrator, RenderFailure,
            RequestOutcome, RequestState, Stage,
        },
        render::{ResultRenderer, SignalReport, Spectrogram, SummaryRenderer},
        service::SeparationService,
    },
    error::{ErrorKind, Result, SepError},
    io::progress::{clear_download_progress_callback, set_download_progress_callback},
    model::{
        dummy::{DummyLoader, DummyModel},
        model_manager::{ensure_model, ModelHandle, ModelManifest},
        ModelLoader, SeparationModel,
    },
    types::{AudioBuffer, AudioSource, SeparationResult, StagingStrategy, UploadedAsset},
};
