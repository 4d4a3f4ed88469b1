use std::{
    fs::File,
    io::{Cursor, ErrorKind as IoErrorKind},
    path::Path,
};

use anyhow::Context;
use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{
    InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::{
    error::{Result, SepError},
    types::AudioBuffer,
};

/// Interleaved samples as they came out of the container.
#[derive(Clone, Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Averages all channels into one and checks the buffer invariants.
    pub fn into_mono(self) -> Result<AudioBuffer> {
        let mono = downmix_to_mono(&self.samples, self.channels);
        AudioBuffer::new(mono, self.sample_rate)
    }
}

pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<DecodedAudio> {
    let path: &Path = path.as_ref();

    let file: File = File::open(path)
        .map_err(|e| SepError::Decode(format!("failed to open {}: {e}", path.display())))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_source(Box::new(file), hint)
}

pub fn decode_wav_bytes(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut hint = Hint::new();
    hint.with_extension("wav");
    decode_source(Box::new(Cursor::new(bytes.to_vec())), hint)
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SepError::Decode(format!("unrecognised audio container: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SepError::Decode("no default track found".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| SepError::Decode(format!("unsupported codec: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == IoErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(SepError::Decode(format!("corrupt audio stream: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| SepError::Decode(format!("corrupt audio packet: {e}")))?;
        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if sample_rate == 0 || channels == 0 {
        return Err(SepError::Decode("missing sample rate or channel layout".into()));
    }
    if samples.is_empty() {
        return Err(SepError::Decode("audio contains no samples".into()));
    }

    debug!(sample_rate, channels, samples = samples.len(), "decoded audio");

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|chunk| chunk.iter().copied().sum::<f32>() / channels as f32)
        .collect()
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encodes a mono buffer as a self-contained 16-bit PCM WAV file.
pub fn encode_wav_bytes(audio: &AudioBuffer) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(44 + audio.len() * 2);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), wav_spec(audio.sample_rate()))
            .context("Failed to start WAV encoder")?;
        for &sample in audio.samples() {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize().context("Failed to finalize WAV data")?;
    }
    Ok(bytes)
}

pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioBuffer) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut writer = WavWriter::create(path, wav_spec(audio.sample_rate()))
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for &sample in audio.samples() {
        writer.write_sample(to_i16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

const SINC_LEN: usize = 256;

/// Sinc resampling to `output_rate`. The result is trimmed to
/// `round(len * output_rate / input_rate)` samples.
///
/// A single `SincFixedIn` pass stops about half a filter length before the
/// end of its chunk, so the input is padded with silence to flush the tail.
pub fn resample(samples: &[f32], input_rate: u32, output_rate: u32) -> anyhow::Result<Vec<f32>> {
    if input_rate == output_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let params = InterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: InterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let tail = SINC_LEN + 2 * (1.0 / ratio).ceil() as usize + 2;
    let mut padded = Vec::with_capacity(samples.len() + tail);
    padded.extend_from_slice(samples);
    padded.resize(samples.len() + tail, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, padded.len(), 1)
        .context("Failed to build resampler")?;

    let input = vec![padded];
    let mut output = resampler
        .process(&input, None)
        .context("Resampling failed")?;
    let mut out = output.pop().unwrap_or_default();

    let expected = (samples.len() as f64 * ratio).round() as usize;
    out.resize(expected, 0.0);
    Ok(out)
}
