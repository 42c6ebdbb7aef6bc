//! Synthesized speech playback.
//!
//! ```text
//! tts chunk (base64) → PlaybackScheduler → AudioOutput (Timeline) → cpal
//!                              ▲                    │
//!                              └──── level() ◄──────┘  (energy meter)
//! ```
//!
//! [`PlaybackScheduler`] decides *when* each chunk plays; an [`AudioOutput`]
//! owns the sample clock and mixes.  Production uses [`CpalOutput`]; tests
//! drive a [`SharedTimeline`] by hand.

pub mod analyser;
pub mod device;
pub mod output;
pub mod scheduler;

pub use analyser::AnalysisWindow;
pub use device::{CpalOutput, OutputError};
pub use output::{AudioOutput, SharedTimeline, SourceId, Timeline};
pub use scheduler::{
    DecodeOutcome, PlaybackChunk, PlaybackScheduler, PlaybackTunables, ScheduledSpan,
    DEFAULT_TTS_SAMPLE_RATE,
};
