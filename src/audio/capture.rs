//! Microphone device access via `cpal`.
//!
//! [`AudioCapture`] resolves an input device (by name or the host default)
//! and its preferred stream configuration.  [`AudioCapture::start`] hands
//! every hardware buffer to a sink closure on the cpal audio thread; the
//! returned [`StreamHandle`] is a RAII guard, dropping it stops the stream.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// Keeps the cpal input stream alive.
///
/// `cpal::Stream` is not `Send` on every platform, so the handle must stay on
/// the thread that created it.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring or running the microphone.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture thread terminated before the stream started")]
    WorkerGone,
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// An opened (but not yet streaming) microphone.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open the input device called `name`, or the host default when `None`.
    pub fn open(name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match name {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_owned()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        log::debug!(
            "capture: opened '{}' ({} Hz, {} ch)",
            device.name().unwrap_or_else(|_| "<unnamed>".into()),
            sample_rate,
            channels
        );

        Ok(Self {
            device,
            config,
            sample_rate,
            channels,
        })
    }

    /// Start streaming; `sink` receives each interleaved `f32` buffer on the
    /// cpal audio thread.
    pub fn start<F>(&self, mut sink: F) -> Result<StreamHandle, CaptureError>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink(data),
            |err: cpal::StreamError| {
                log::warn!("capture: stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    /// Native sample rate of the device in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channel count of each delivered buffer.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
