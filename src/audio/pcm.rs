//! PCM16 conversion, base64 wire encoding and payload decoding.
//!
//! Outbound microphone packets and inbound synthesized audio both travel as
//! base64 text inside JSON frames.  This module owns the byte-level side of
//! that: `f32` ↔ little-endian PCM16, base64 ↔ bytes, and turning a TTS
//! payload (WAV container or raw PCM16) into mono `f32` samples.
//!
//! Everything here is a pure function; nothing holds state.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Reasons a synthesized audio payload could not be turned into samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed WAV container: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported WAV sample format ({bits} bits, {format:?})")]
    UnsupportedFormat {
        bits: u16,
        format: hound::SampleFormat,
    },

    #[error("payload contained no audio samples")]
    Empty,

    #[error("invalid sample rate {0}")]
    SampleRate(u32),

    #[error("decode task failed: {0}")]
    Task(String),
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// Mono `f32` audio with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// PCM16 <-> f32
// ---------------------------------------------------------------------------

/// Convert `f32` samples to little-endian PCM16 bytes, clamping to full scale.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Convert little-endian PCM16 bytes to `f32` samples.
///
/// A trailing odd byte cannot form a sample and is dropped.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

// ---------------------------------------------------------------------------
// base64
// ---------------------------------------------------------------------------

/// Standard-alphabet base64 with padding, as the peer expects.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text.trim())?)
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

/// `true` when `bytes` starts with a RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Length of a header-only WAV prefix (RIFF size 36, data size 0) that some
/// streaming synthesizers glue in front of raw PCM, or `None`.
fn empty_wav_header_len(bytes: &[u8]) -> Option<usize> {
    if !is_wav(bytes) || bytes.len() < 44 {
        return None;
    }
    let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let data_size = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
    (riff_size == 36 && data_size == 0).then_some(44)
}

/// Decode a synthesized audio payload into mono samples.
///
/// * WAV containers are parsed with `hound`; multi-channel audio is
///   down-mixed by averaging.
/// * Anything else is treated as raw PCM16 at `fallback_rate`.
pub fn decode_payload(bytes: &[u8], fallback_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let decoded = match empty_wav_header_len(bytes) {
        Some(header) => decode_raw(&bytes[header..], fallback_rate)?,
        None if is_wav(bytes) => decode_wav(bytes)?,
        None => decode_raw(bytes, fallback_rate)?,
    };

    if decoded.samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(decoded)
}

/// Decode base64 text and then the payload inside it.
pub fn decode_base64_payload(text: &str, fallback_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let bytes = decode_base64(text)?;
    decode_payload(&bytes, fallback_rate)
}

fn decode_raw(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio, DecodeError> {
    if sample_rate == 0 {
        return Err(DecodeError::SampleRate(sample_rate));
    }
    Ok(DecodedAudio {
        samples: pcm16_bytes_to_f32(bytes),
        sample_rate,
    })
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(DecodeError::SampleRate(spec.sample_rate));
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32_768.0))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, bits @ (24 | 32)) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (hound::SampleFormat::Float, 32) => {
            reader.samples::<f32>().collect::<Result<_, _>>()?
        }
        (format, bits) => return Err(DecodeError::UnsupportedFormat { bits, format }),
    };

    Ok(DecodedAudio {
        samples: crate::audio::stereo_to_mono(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
