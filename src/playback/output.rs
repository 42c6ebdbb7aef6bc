//! Output timeline: scheduled sources mixed against a sample clock.
//!
//! The speaker is modelled as a frame counter.  A source is a block of mono
//! samples pinned to a start frame; whatever renders the timeline (the cpal
//! callback in production, [`SharedTimeline::advance`] in tests) mixes every
//! source overlapping the requested window, copies the mix to all channels,
//! feeds the analysis window and moves the clock forward.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::audio::resample_linear;
use crate::playback::analyser::AnalysisWindow;

/// Identifies one scheduled source.
pub type SourceId = u64;

/// About 40 ms of output at 48 kHz.
const ANALYSIS_WINDOW: usize = 2048;

/// Render period of [`SharedTimeline::run_wall_clock`].
const WALL_CLOCK_TICK: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// The audio output graph as seen by the scheduler.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds.
    fn now(&self) -> f64;

    /// Device sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Queue mono `samples` (at `sample_rate`) to begin at `start` seconds on
    /// the output clock.  A start in the past begins immediately.
    fn schedule(&self, samples: &[f32], sample_rate: u32, start: f64) -> SourceId;

    /// Silence and forget every scheduled source.
    fn stop_all(&self);

    /// RMS of the most recently rendered output.
    fn level(&self) -> f32;

    /// Sources that have not finished playing.
    fn active_sources(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

struct Source {
    start_frame: u64,
    /// Mono samples at the timeline rate.
    samples: Vec<f32>,
}

impl Source {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixer state behind [`SharedTimeline`].
pub struct Timeline {
    sample_rate: u32,
    channels: u16,
    frame: u64,
    next_id: SourceId,
    sources: Vec<Source>,
    analysis: AnalysisWindow,
    mix: Vec<f32>,
}

impl Timeline {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            frame: 0,
            next_id: 1,
            sources: Vec::new(),
            analysis: AnalysisWindow::new(ANALYSIS_WINDOW),
            mix: Vec::new(),
        }
    }

    fn now(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    /// `samples` are already at the timeline rate.
    fn schedule(&mut self, samples: Vec<f32>, start: f64) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;

        let start_frame = ((start.max(0.0) * self.sample_rate as f64).round() as u64).max(self.frame);
        self.sources.push(Source {
            start_frame,
            samples,
        });
        id
    }

    fn stop_all(&mut self) {
        self.sources.clear();
        self.analysis.clear();
    }

    /// Fill `out` (interleaved, `channels` wide) with the next block of the
    /// mix and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels as usize;
        let frames = out.len() / channels;
        let window_start = self.frame;
        let window_end = window_start + frames as u64;

        self.mix.clear();
        self.mix.resize(frames, 0.0);
        for source in &self.sources {
            let from = source.start_frame.max(window_start);
            let to = source.end_frame().min(window_end);
            if from >= to {
                continue;
            }
            let src = &source.samples[(from - source.start_frame) as usize..(to - source.start_frame) as usize];
            let dst = &mut self.mix[(from - window_start) as usize..(to - window_start) as usize];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }

        for (frame, &sample) in out.chunks_exact_mut(channels).zip(&self.mix) {
            frame.fill(sample.clamp(-1.0, 1.0));
        }
        self.analysis.push_slice(&self.mix);

        self.frame = window_end;
        self.sources.retain(|s| s.end_frame() > window_end);
    }

    fn active_sources(&self) -> usize {
        self.sources.len()
    }
}

// ---------------------------------------------------------------------------
// SharedTimeline
// ---------------------------------------------------------------------------

/// Cloneable handle to a [`Timeline`], shared between the scheduler and the
/// renderer.
#[derive(Clone)]
pub struct SharedTimeline(Arc<Mutex<Timeline>>);

impl SharedTimeline {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self(Arc::new(Mutex::new(Timeline::new(sample_rate, channels))))
    }

    /// A panicking render callback must not take playback down with it.
    pub fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Render and discard `frames` frames, as a sound card would consume them.
    pub fn advance(&self, frames: usize) {
        let mut timeline = self.lock();
        let mut scratch = vec![0.0; frames * timeline.channels as usize];
        timeline.render(&mut scratch);
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance_secs(&self, secs: f64) {
        let rate = self.lock().sample_rate;
        self.advance((secs * rate as f64).round() as usize);
    }

    /// Render and discard the timeline in step with wall time, for when no
    /// output device is open.  Keeps the clock moving so startup waits expire
    /// and finished sources are released.  Runs until the task is dropped.
    pub async fn run_wall_clock(self) {
        let rate = self.lock().sample_rate as f64;
        let started = Instant::now();
        let mut rendered: u64 = 0;
        let mut ticker = tokio::time::interval(WALL_CLOCK_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let due = (started.elapsed().as_secs_f64() * rate) as u64;
            if due > rendered {
                self.advance((due - rendered) as usize);
                rendered = due;
            }
        }
    }
}

impl AudioOutput for SharedTimeline {
    fn now(&self) -> f64 {
        self.lock().now()
    }

    fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    fn schedule(&self, samples: &[f32], sample_rate: u32, start: f64) -> SourceId {
        // The renderer holds this lock; convert before taking it.
        let samples = resample_linear(samples, sample_rate, self.sample_rate());
        self.lock().schedule(samples, start)
    }

    fn stop_all(&self) {
        self.lock().stop_all();
    }

    fn level(&self) -> f32 {
        self.lock().analysis.rms()
    }

    fn active_sources(&self) -> usize {
        self.lock().active_sources()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
