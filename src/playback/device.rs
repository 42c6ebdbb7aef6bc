//! Speaker output via `cpal`.
//!
//! [`CpalOutput`] opens the output device on its own thread (the stream is
//! not `Send`), wraps the device rate and channel count in a
//! [`SharedTimeline`] and lets the cpal callback render that timeline.  Every
//! [`AudioOutput`] call is forwarded to the shared timeline.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc as std_mpsc, Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use thiserror::Error;

use crate::playback::output::{AudioOutput, SharedTimeline, SourceId};

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device available")]
    NoDevice,

    #[error("output device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported output sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),

    #[error("output thread terminated before the stream started")]
    WorkerGone,
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

pub struct CpalOutput {
    timeline: SharedTimeline,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the output device called `name`, or the host default when `None`,
    /// and start rendering.
    pub fn open(name: Option<String>) -> Result<Self, OutputError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<SharedTimeline, OutputError>>(1);

        let thread = std::thread::Builder::new()
            .name("speaker-output".into())
            .spawn(move || {
                let stream = match build_stream(name.as_deref()) {
                    Ok((stream, timeline)) => {
                        let _ = ready_tx.send(Ok(timeline));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::park_timeout(Duration::from_millis(100));
                }
                drop(stream);
                log::debug!("output: stream stopped");
            })
            .map_err(|_| OutputError::WorkerGone)?;

        match ready_rx.recv() {
            Ok(Ok(timeline)) => Ok(Self {
                timeline,
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(OutputError::WorkerGone)
            }
        }
    }
}

fn build_stream(name: Option<&str>) -> Result<(cpal::Stream, SharedTimeline), OutputError> {
    let host = cpal::default_host();
    let device = match name {
        Some(wanted) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| OutputError::DeviceNotFound(wanted.to_owned()))?,
        None => host.default_output_device().ok_or(OutputError::NoDevice)?,
    };

    let supported = device.default_output_config()?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let timeline = SharedTimeline::new(config.sample_rate.0, config.channels);

    let err_fn = |err: cpal::StreamError| log::warn!("output: stream error: {err}");

    let stream = match sample_format {
        SampleFormat::F32 => {
            let timeline = timeline.clone();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| timeline.lock().render(data),
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let timeline = timeline.clone();
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0_f32);
                    timeline.lock().render(&mut scratch);
                    for (out, s) in data.iter_mut().zip(&scratch) {
                        *out = (s * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )?
        }
        other => return Err(OutputError::UnsupportedFormat(other)),
    };

    stream.play()?;
    log::info!(
        "output: '{}' at {} Hz, {} ch",
        device.name().unwrap_or_else(|_| "<unnamed>".into()),
        config.sample_rate.0,
        config.channels
    );
    Ok((stream, timeline))
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.timeline.now()
    }

    fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate()
    }

    fn schedule(&self, samples: &[f32], sample_rate: u32, start: f64) -> SourceId {
        self.timeline.schedule(samples, sample_rate, start)
    }

    fn stop_all(&self) {
        self.timeline.stop_all();
    }

    fn level(&self) -> f32 {
        self.timeline.level()
    }

    fn active_sources(&self) -> usize {
        self.timeline.active_sources()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}
