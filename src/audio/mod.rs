//! Audio primitives and the microphone capture pipeline.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → stereo_to_mono → Decimator (→ 16 kHz)
//!           → PacketFramer (20 ms) → VoicePacket (tokio mpsc) → session
//! ```
//!
//! The inbound direction only needs the pure helpers: [`decode_base64_payload`]
//! turns a synthesized chunk into mono samples and [`resample_linear`] brings
//! them to the output device rate.

pub mod capture;
pub mod framer;
pub mod pcm;
pub mod pipeline;
pub mod resample;

pub use capture::{AudioCapture, CaptureError, StreamHandle};
pub use framer::{PacketFramer, VoicePacket, FRAME_MS, FRAME_SAMPLES, TARGET_SAMPLE_RATE};
pub use pcm::{
    decode_base64, decode_base64_payload, decode_payload, encode_base64, f32_to_pcm16_bytes,
    pcm16_bytes_to_f32, DecodeError, DecodedAudio,
};
pub use pipeline::{CapturePipeline, MicReady, Microphone};
pub use resample::{resample_linear, stereo_to_mono, Decimator};
