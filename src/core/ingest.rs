use tracing::{info, warn};

use crate::{
    config::Settings,
    core::{
        artifacts::ArtifactStore,
        audio::{decode_wav_bytes, read_audio, DecodedAudio},
    },
    error::{Result, SepError},
    types::{AudioBuffer, StagingStrategy, UploadedAsset},
};

const UPLOAD_STAGING_NAME: &str = "upload.wav";

/// Validates an upload and decodes it to a mono buffer.
///
/// With temp-file staging the bytes pass through `store` and the staged copy
/// is released before this returns, whatever the outcome.
pub fn ingest(
    upload: &UploadedAsset,
    settings: &Settings,
    store: &mut ArtifactStore,
) -> Result<AudioBuffer> {
    if upload.size() == 0 {
        return Err(SepError::Decode("upload is empty".into()));
    }
    if upload.size() > settings.max_upload_bytes {
        return Err(SepError::UploadTooLarge {
            size: upload.size(),
            limit: settings.max_upload_bytes,
        });
    }
    if !upload.declares_wav() {
        warn!(
            name = %upload.name,
            mime = %upload.mime_type,
            "upload does not declare a WAV type, checking content anyway"
        );
    }

    let decoded = match store.strategy() {
        StagingStrategy::InMemory => decode_wav_bytes(upload.bytes())?,
        StagingStrategy::TempFile => decode_staged(upload, store)?,
    };

    let channels = decoded.channels;
    let frames = decoded.frames();
    let audio = decoded.into_mono()?;

    info!(
        name = %upload.name,
        size = upload.size(),
        sample_rate = audio.sample_rate(),
        channels,
        frames,
        duration_secs = audio.duration_secs(),
        "ingested upload"
    );

    Ok(audio)
}

fn decode_staged(upload: &UploadedAsset, store: &mut ArtifactStore) -> Result<DecodedAudio> {
    let staged = store.stage_bytes(UPLOAD_STAGING_NAME, upload.bytes().to_vec())?;
    let decoded = match staged.path() {
        Some(path) => read_audio(path),
        None => decode_wav_bytes(upload.bytes()),
    };
    let released = staged.release();

    let decoded = decoded?;
    released?;
    Ok(decoded)
}
