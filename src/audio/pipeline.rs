//! Microphone capture pipeline: device → framer → packet channel.
//!
//! `cpal::Stream` cannot cross threads, so [`CapturePipeline`] runs a
//! dedicated OS thread that opens the device, owns the stream for its whole
//! life and parks until the stop flag is raised.  Opening the device can take
//! a while (permission prompts), so `enable` returns at once and reports the
//! outcome on a oneshot.  Framing happens inside the cpal callback; finished
//! [`VoicePacket`]s go out over a bounded tokio channel in capture order.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::audio::capture::{AudioCapture, CaptureError};
use crate::audio::framer::{PacketFramer, VoicePacket};

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Resolves once the device is streaming, or with the reason it is not.  A
/// dropped sender means the worker died before it could answer.
pub type MicReady = oneshot::Receiver<Result<(), CaptureError>>;

/// Something that can stream voice packets on demand.
///
/// Both operations are idempotent: enabling an enabled (or starting)
/// microphone and disabling one that never started are no-ops.  Neither
/// blocks on the device.
pub trait Microphone: Send {
    /// Start acquiring the device and stream packets into `tx`.  `None` when
    /// the microphone is already enabled or starting.
    fn enable(&mut self, tx: mpsc::Sender<VoicePacket>) -> Option<MicReady>;

    /// Stop streaming and release the device.
    fn disable(&mut self);

    /// `true` from `enable` until `disable`, including while starting.
    fn is_enabled(&self) -> bool;
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// The cpal-backed [`Microphone`].
pub struct CapturePipeline {
    device_name: Option<String>,
    worker: Option<Worker>,
}

impl CapturePipeline {
    /// `device_name` of `None` means the host default input.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }
}

impl Microphone for CapturePipeline {
    fn enable(&mut self, tx: mpsc::Sender<VoicePacket>) -> Option<MicReady> {
        if self.worker.is_some() {
            return None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let spawned = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let started = AudioCapture::open(device_name.as_deref()).and_then(|capture| {
                    let mut framer = PacketFramer::new(capture.sample_rate(), capture.channels());
                    capture.start(move |data| {
                        for packet in framer.push(data) {
                            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(packet) {
                                log::debug!("capture: packet channel full, dropping packet");
                            }
                        }
                    })
                });

                let handle = match started {
                    Ok(handle) => handle,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    log::debug!("capture: nobody waiting for the device any more");
                }

                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::park_timeout(Duration::from_millis(100));
                }

                // Dropping the handle stops the device; the framer and its
                // carryover go with the callback.
                drop(handle);
                log::debug!("capture: stream stopped");
            });

        // On a failed spawn the closure, and with it `ready_tx`, is dropped,
        // which the receiver reports as a dead worker.
        match spawned {
            Ok(thread) => {
                self.worker = Some(Worker { stop, thread });
                log::info!("capture: opening microphone");
            }
            Err(e) => log::warn!("capture: cannot start worker thread: {e}"),
        }
        Some(ready_rx)
    }

    fn disable(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Relaxed);
        worker.thread.thread().unpark();
        // Not joined: the worker may still be inside the device open, and it
        // releases the stream on its own once it sees the flag.
        log::info!("capture: microphone disabled");
    }

    fn is_enabled(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.disable();
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records enable/disable calls and lets tests inject packets.
    #[derive(Clone, Default)]
    pub struct FakeMicrophone {
        pub inner: Arc<Mutex<FakeState>>,
    }

    #[derive(Default)]
    pub struct FakeState {
        pub tx: Option<mpsc::Sender<VoicePacket>>,
        pub enables: usize,
        pub disables: usize,
        pub fail_next: bool,
        /// Hold the ready signal in `pending_ready` instead of answering.
        pub defer_ready: bool,
        pub pending_ready: Option<oneshot::Sender<Result<(), CaptureError>>>,
    }

    impl Microphone for FakeMicrophone {
        fn enable(&mut self, tx: mpsc::Sender<VoicePacket>) -> Option<MicReady> {
            let mut state = self.inner.lock().unwrap();
            if state.tx.is_some() {
                return None;
            }
            let (ready_tx, ready_rx) = oneshot::channel();
            if state.fail_next {
                state.fail_next = false;
                let _ = ready_tx.send(Err(CaptureError::NoDevice));
                return Some(ready_rx);
            }
            state.tx = Some(tx);
            state.enables += 1;
            if state.defer_ready {
                state.pending_ready = Some(ready_tx);
            } else {
                let _ = ready_tx.send(Ok(()));
            }
            Some(ready_rx)
        }

        fn disable(&mut self) {
            let mut state = self.inner.lock().unwrap();
            if state.tx.take().is_some() {
                state.disables += 1;
            }
        }

        fn is_enabled(&self) -> bool {
            self.inner.lock().unwrap().tx.is_some()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
