//! Jitter-tolerant playback scheduling with generation-based cancellation.
//!
//! # Flow
//!
//! ```text
//! enqueue(chunk) ──► spawn_blocking(decode) ──► FuturesOrdered
//!                                                   │ arrival order
//!                                                   ▼
//!                         on_decoded(outcome) ── stale generation? drop
//!                                                   │
//!                         startup buffer ──(threshold | max wait)──► flush
//!                                                   │
//!                                 streaming ──► schedule at cursor
//! ```
//!
//! Decodes of later chunks may finish first, but [`FuturesOrdered`] yields
//! them in enqueue order, so the cursor only ever moves forward and spans
//! never overlap.  [`PlaybackScheduler::cancel`] bumps the generation; every
//! outcome stamped with an older generation is discarded on arrival.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesOrdered, StreamExt};
use serde::{Deserialize, Serialize};

use crate::audio::{decode_base64_payload, resample_linear, DecodeError, DecodedAudio};
use crate::playback::output::{AudioOutput, SourceId};

/// Rate assumed for raw PCM payloads that do not advertise one.
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 24_000;

/// Upper bound for the startup buffer and wait tunables.
pub const MAX_STARTUP_MS: u32 = 1_000;

/// Upper bound for the scheduling lead.
pub const MAX_LEAD_MS: u32 = 300;

/// Output RMS is small for speech; scale it into a usable [0, 1] range.
const ENERGY_GAIN: f32 = 3.0;
/// EMA factor per meter tick while audio is playing.
const ENERGY_SMOOTHING: f32 = 0.35;
/// Per-tick decay applied once output has gone quiet.
const ENERGY_DECAY: f32 = 0.85;
const ENERGY_FLOOR: f32 = 1e-3;

// ---------------------------------------------------------------------------
// PlaybackTunables
// ---------------------------------------------------------------------------

/// Startup buffering and lead time, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackTunables {
    /// Buffered audio needed before the first chunk of an utterance plays.
    pub startup_buffer_ms: u32,
    /// Longest time the first chunk may wait for the buffer to fill.
    pub startup_max_wait_ms: u32,
    /// Distance ahead of the output clock at which a flush is scheduled.
    pub schedule_lead_ms: u32,
}

impl Default for PlaybackTunables {
    fn default() -> Self {
        Self {
            startup_buffer_ms: 120,
            startup_max_wait_ms: 120,
            schedule_lead_ms: 30,
        }
    }
}

impl PlaybackTunables {
    /// Every field forced into its safe range.
    pub fn clamped(self) -> Self {
        Self {
            startup_buffer_ms: self.startup_buffer_ms.min(MAX_STARTUP_MS),
            startup_max_wait_ms: self.startup_max_wait_ms.min(MAX_STARTUP_MS),
            schedule_lead_ms: self.schedule_lead_ms.min(MAX_LEAD_MS),
        }
    }

    /// Overlay the values a peer advisory supplied; missing or non-numeric
    /// values keep the current setting.
    pub fn merged(
        self,
        startup_buffer_ms: Option<f64>,
        startup_max_wait_ms: Option<f64>,
        schedule_lead_ms: Option<f64>,
    ) -> Self {
        Self {
            startup_buffer_ms: clamp_ms(startup_buffer_ms, self.startup_buffer_ms, MAX_STARTUP_MS),
            startup_max_wait_ms: clamp_ms(startup_max_wait_ms, self.startup_max_wait_ms, MAX_STARTUP_MS),
            schedule_lead_ms: clamp_ms(schedule_lead_ms, self.schedule_lead_ms, MAX_LEAD_MS),
        }
    }

    fn startup_buffer_secs(&self) -> f64 {
        self.startup_buffer_ms as f64 / 1000.0
    }

    fn startup_max_wait_secs(&self) -> f64 {
        self.startup_max_wait_ms as f64 / 1000.0
    }

    fn lead_secs(&self) -> f64 {
        self.schedule_lead_ms as f64 / 1000.0
    }
}

fn clamp_ms(value: Option<f64>, current: u32, max: u32) -> u32 {
    match value {
        Some(v) if v.is_finite() => v.round().clamp(0.0, max as f64) as u32,
        _ => current,
    }
}

// ---------------------------------------------------------------------------
// Chunks, outcomes, spans
// ---------------------------------------------------------------------------

/// Synthesized audio as received, still base64 encoded.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub seq: Option<u64>,
    pub is_final: bool,
    pub payload: String,
    /// Rate for raw PCM payloads; WAV payloads carry their own.
    pub sample_rate: Option<u32>,
}

/// A finished decode, stamped with the generation it was started under.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub generation: u64,
    pub seq: Option<u64>,
    pub is_final: bool,
    pub result: Result<DecodedAudio, DecodeError>,
}

/// One source placed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSpan {
    pub seq: Option<u64>,
    pub source: SourceId,
    /// Start on the output clock, seconds.
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSpan {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

struct Buffered {
    seq: Option<u64>,
    audio: DecodedAudio,
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    tunables: PlaybackTunables,
    generation: u64,
    /// Where the next chunk of the current utterance starts.
    next_start: f64,
    /// `true` once the startup buffer of the current utterance was flushed.
    streaming: bool,
    startup: Vec<Buffered>,
    startup_secs: f64,
    /// Output-clock time the first chunk entered the startup buffer.
    startup_since: Option<f64>,
    pending: FuturesOrdered<BoxFuture<'static, DecodeOutcome>>,
    energy: f32,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, tunables: PlaybackTunables) -> Self {
        Self {
            output,
            tunables: tunables.clamped(),
            generation: 0,
            next_start: 0.0,
            streaming: false,
            startup: Vec::new(),
            startup_secs: 0.0,
            startup_since: None,
            pending: FuturesOrdered::new(),
            energy: 0.0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tunables(&self) -> PlaybackTunables {
        self.tunables
    }

    pub fn set_tunables(&mut self, tunables: PlaybackTunables) {
        self.tunables = tunables.clamped();
        log::debug!("playback: tunables now {:?}", self.tunables);
    }

    /// Decodes queued but not yet delivered through [`Self::next_decoded`].
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Chunks held in the startup buffer.
    pub fn buffered_chunks(&self) -> usize {
        self.startup.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    // -----------------------------------------------------------------------
    // Decode queue
    // -----------------------------------------------------------------------

    /// Start decoding `chunk` off the async runtime.  Must be called from
    /// within a tokio runtime.
    pub fn enqueue(&mut self, chunk: PlaybackChunk) {
        let generation = self.generation;
        let PlaybackChunk {
            seq,
            is_final,
            payload,
            sample_rate,
        } = chunk;
        let rate = sample_rate.unwrap_or(DEFAULT_TTS_SAMPLE_RATE);

        let decode = tokio::task::spawn_blocking(move || decode_base64_payload(&payload, rate));
        self.pending.push_back(
            async move {
                let result = match decode.await {
                    Ok(result) => result,
                    Err(e) => Err(DecodeError::Task(e.to_string())),
                };
                DecodeOutcome {
                    generation,
                    seq,
                    is_final,
                    result,
                }
            }
            .boxed(),
        );
    }

    /// Next decode in enqueue order.  Pending forever when nothing is
    /// queued; guard with [`Self::has_pending`] inside `select!`.
    pub async fn next_decoded(&mut self) -> Option<DecodeOutcome> {
        if self.pending.is_empty() {
            return std::future::pending().await;
        }
        self.pending.next().await
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Place a finished decode on the timeline (or into the startup buffer).
    /// Returns every span scheduled as a result.
    pub fn on_decoded(&mut self, outcome: DecodeOutcome) -> Vec<ScheduledSpan> {
        if outcome.generation != self.generation {
            log::debug!(
                "playback: discarding seq {:?} from generation {} (now {})",
                outcome.seq,
                outcome.generation,
                self.generation
            );
            return Vec::new();
        }

        let audio = match outcome.result {
            Ok(audio) => Some(audio),
            Err(e) => {
                log::warn!("playback: dropping undecodable chunk seq {:?}: {e}", outcome.seq);
                None
            }
        };

        let now = self.output.now();
        if self.streaming && now > self.next_start {
            // Everything scheduled has drained; the next chunk opens a new
            // utterance with fresh startup buffering.
            self.streaming = false;
        }

        if self.streaming {
            return audio
                .map(|audio| vec![self.place(outcome.seq, &audio, now)])
                .unwrap_or_default();
        }

        if let Some(audio) = audio {
            self.startup_secs += audio.duration_secs();
            self.startup.push(Buffered {
                seq: outcome.seq,
                audio,
            });
            self.startup_since.get_or_insert(now);
        }

        let waited = self.startup_since.map(|t| now - t).unwrap_or(0.0);
        if self.startup_secs >= self.tunables.startup_buffer_secs()
            || waited >= self.tunables.startup_max_wait_secs()
            || outcome.is_final
        {
            self.flush_startup(now)
        } else {
            Vec::new()
        }
    }

    /// Flush the startup buffer once its maximum wait has elapsed.  Call on
    /// every meter tick.
    pub fn poll_startup(&mut self) -> Vec<ScheduledSpan> {
        let Some(since) = self.startup_since else {
            return Vec::new();
        };
        let now = self.output.now();
        if now - since >= self.tunables.startup_max_wait_secs() {
            self.flush_startup(now)
        } else {
            Vec::new()
        }
    }

    fn flush_startup(&mut self, now: f64) -> Vec<ScheduledSpan> {
        self.startup_since = None;
        self.startup_secs = 0.0;
        if self.startup.is_empty() {
            return Vec::new();
        }

        self.next_start = self.next_start.max(now + self.tunables.lead_secs());
        let buffered = std::mem::take(&mut self.startup);
        let spans: Vec<ScheduledSpan> = buffered
            .iter()
            .map(|b| self.place(b.seq, &b.audio, now))
            .collect();
        self.streaming = true;
        log::debug!("playback: startup flush of {} chunk(s)", spans.len());
        spans
    }

    /// Schedule at the cursor and advance it by the chunk length.  Start and
    /// length are whole output frames, so adjacent spans share an edge.
    fn place(&mut self, seq: Option<u64>, audio: &DecodedAudio, now: f64) -> ScheduledSpan {
        let rate = f64::from(self.output.sample_rate());
        let start = if self.next_start >= now {
            self.next_start
        } else {
            now + self.tunables.lead_secs()
        };
        let start = (start * rate).round() / rate;
        let samples = resample_linear(&audio.samples, audio.sample_rate, self.output.sample_rate());
        let duration = samples.len() as f64 / rate;
        let source = self.output.schedule(&samples, self.output.sample_rate(), start);
        self.next_start = start + duration;
        ScheduledSpan {
            seq,
            source,
            start,
            duration,
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Stop everything: bump the generation, silence the output, drop every
    /// buffered or in-flight chunk and zero the meter.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.output.stop_all();
        self.startup.clear();
        self.startup_secs = 0.0;
        self.startup_since = None;
        self.pending = FuturesOrdered::new();
        self.next_start = 0.0;
        self.streaming = false;
        self.energy = 0.0;
        log::debug!("playback: cancelled, generation {}", self.generation);
    }

    // -----------------------------------------------------------------------
    // Metering
    // -----------------------------------------------------------------------

    /// Sample the output level and return the smoothed energy in `[0, 1]`.
    /// Call once per display frame.
    pub fn sample_energy(&mut self) -> f32 {
        if self.output.active_sources() > 0 {
            let target = (self.output.level() * ENERGY_GAIN).clamp(0.0, 1.0);
            self.energy += (target - self.energy) * ENERGY_SMOOTHING;
        } else {
            self.energy *= ENERGY_DECAY;
            if self.energy < ENERGY_FLOOR {
                self.energy = 0.0;
            }
        }
        self.energy = self.energy.clamp(0.0, 1.0);
        self.energy
    }

    pub fn energy(&self) -> f32 {
        self.energy
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
