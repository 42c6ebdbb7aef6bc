//! Session controller: the call's protocol state machine.
//!
//! [`SessionController`] owns everything tied to one call: the microphone,
//! the playback scheduler, caption correlation and the outbound message
//! queue.  It never touches the socket itself; the connection driver feeds
//! it inbound frames, commands, voice packets, decode completions and meter
//! ticks, and it answers by mutating [`SharedState`] and queueing
//! [`ClientMessage`]s.
//!
//! # Event routing
//!
//! ```text
//! server.hello        ─▶ session id, Connected
//! client.config       ─▶ scheduler tunables (clamped)
//! state.update        ─▶ phase; thinking: flush captions
//!                              interrupted: cancel playback
//!                              listening: flush captions, close turn
//! avatar.state        ─▶ emotion
//! input.text_update   ─▶ live caption; final: new user turn
//! tts.audio[_chunk]   ─▶ scheduler.enqueue
//! tts.text_stream     ─▶ caption buffer (released when its audio schedules)
//! error               ─▶ notice
//! ```
//!
//! No fault escapes: malformed frames, decode failures and device errors
//! are logged, surfaced as notices and dropped.

use tokio::sync::mpsc;

use crate::audio::{CaptureError, MicReady, Microphone, VoicePacket};
use crate::avatar::Emotion;
use crate::playback::{DecodeOutcome, PlaybackChunk, PlaybackScheduler, ScheduledSpan};
use crate::protocol::{CallPhase, ClientMessage, ServerMessage};

use super::captions::CaptionBuffer;
use super::state::{ConnectionState, SharedState};

/// Buffered voice packets between the capture thread and the session loop.
pub const PACKET_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// SessionCommand
// ---------------------------------------------------------------------------

/// Intents coming from the window.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    SetMic(bool),
    ToggleMic,
    SendText(String),
    Interrupt,
    /// Tear down and stop the session loop.
    Shutdown,
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Background work the session loop waits on alongside the socket.
#[derive(Debug)]
pub enum Completion {
    Decoded(DecodeOutcome),
    /// The microphone finished opening, or failed to.
    MicReady(Result<(), CaptureError>),
}

pub struct SessionController {
    state: SharedState,
    scheduler: PlaybackScheduler,
    mic: Box<dyn Microphone>,
    /// Present while the device is opening.  Dropped on switch-off and
    /// teardown, which discards a result that arrives late.
    mic_ready: Option<MicReady>,
    packet_tx: mpsc::Sender<VoicePacket>,
    captions: CaptionBuffer,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
}

impl SessionController {
    /// `packet_tx` is handed to the microphone on every enable; its receiver
    /// belongs to the connection driver.
    pub fn new(
        state: SharedState,
        scheduler: PlaybackScheduler,
        mic: Box<dyn Microphone>,
        packet_tx: mpsc::Sender<VoicePacket>,
    ) -> Self {
        Self {
            state,
            scheduler,
            mic,
            mic_ready: None,
            packet_tx,
            captions: CaptionBuffer::new(),
            outbound: None,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    fn notice(&self, notice: impl Into<String>) {
        self.state.lock().push_notice(notice);
    }

    fn send(&self, message: ClientMessage) {
        match &self.outbound {
            Some(tx) => {
                if tx.send(message).is_err() {
                    log::debug!("session: writer gone, dropping outbound message");
                }
            }
            None => log::debug!("session: not connected, dropping outbound message"),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// A connection attempt has started.
    pub fn begin_connect(&mut self) {
        let mut st = self.state.lock();
        st.connection = ConnectionState::Connecting;
        st.session_id = None;
        log::info!("session: connecting");
    }

    /// The socket is open; queue the handshake on `outbound`.
    pub fn attach(&mut self, outbound: mpsc::UnboundedSender<ClientMessage>) {
        self.outbound = Some(outbound);
        self.send(ClientMessage::Hello);
    }

    /// Close or error: stop capture and playback, drop the outbound queue
    /// and reset the status.  Safe to call in any state, any number of times.
    pub fn teardown(&mut self, reason: &str) {
        self.mic_ready = None;
        self.mic.disable();
        self.scheduler.cancel();
        self.captions.clear();
        let was_attached = self.outbound.take().is_some();

        let mut st = self.state.lock();
        let was_live = st.connection != ConnectionState::Disconnected;
        st.reset_call();
        if was_live || was_attached {
            log::info!("session: disconnected ({reason})");
            st.push_notice(format!("Disconnected: {reason}"));
        }
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    /// Parse and route one text frame; bad frames are logged and dropped.
    pub fn handle_frame(&mut self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => log::warn!("session: ignoring frame: {e}"),
        }
    }

    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Hello { session_id } => {
                log::info!("session: connected as {session_id}");
                let mut st = self.state.lock();
                st.connection = ConnectionState::Connected;
                st.session_id = Some(session_id);
            }

            ServerMessage::Config { playback } => {
                let tunables = self.scheduler.tunables().merged(
                    playback.startup_buffer_ms,
                    playback.startup_max_wait_ms,
                    playback.schedule_lead_ms,
                );
                self.scheduler.set_tunables(tunables);
            }

            ServerMessage::StateUpdate { state } => self.on_phase(state),

            ServerMessage::AvatarState { emotion, source, .. } => {
                let emotion = Emotion::normalize(&emotion);
                log::debug!("session: emotion {emotion} (source {source:?})");
                self.state.lock().emotion = emotion;
            }

            ServerMessage::TextUpdate { text, is_final } => {
                let mut st = self.state.lock();
                if is_final {
                    st.live_caption.clear();
                    if !text.trim().is_empty() {
                        st.transcript.begin_user_turn(text);
                    }
                } else {
                    st.live_caption = text;
                }
            }

            ServerMessage::TtsAudio {
                seq,
                text,
                audio,
                is_final,
            } => {
                if let Some(text) = text {
                    let ready = self.captions.push(seq, &text);
                    self.append_assistant(ready);
                }
                self.scheduler.enqueue(PlaybackChunk {
                    seq,
                    is_final,
                    payload: audio,
                    sample_rate: None,
                });
            }

            ServerMessage::TtsAudioChunk {
                seq,
                is_final,
                chunk,
                sample_rate,
            } => {
                self.scheduler.enqueue(PlaybackChunk {
                    seq,
                    is_final,
                    payload: chunk,
                    sample_rate,
                });
            }

            ServerMessage::TtsTextStream { seq, text } => {
                let ready = self.captions.push(seq, &text);
                self.append_assistant(ready);
            }

            ServerMessage::Error { message } => {
                log::warn!("session: peer error: {message}");
                self.notice(format!("Server error: {message}"));
            }
        }
    }

    fn on_phase(&mut self, phase: CallPhase) {
        log::debug!("session: phase {}", phase.label());
        match phase {
            CallPhase::Thinking => {
                let pending = self.captions.flush_all();
                self.append_assistant(pending);
            }
            CallPhase::Interrupted => {
                self.scheduler.cancel();
                self.captions.clear();
            }
            CallPhase::Listening => {
                let pending = self.captions.flush_all();
                self.append_assistant(pending);
                self.state.lock().transcript.close_turn();
            }
            CallPhase::Idle | CallPhase::Speaking => {}
        }
        self.state.lock().phase = phase;
    }

    fn append_assistant(&self, fragments: Vec<String>) {
        if fragments.is_empty() {
            return;
        }
        let mut st = self.state.lock();
        for fragment in &fragments {
            st.transcript.append_assistant(fragment);
        }
    }

    // -----------------------------------------------------------------------
    // Playback plumbing
    // -----------------------------------------------------------------------

    /// `true` while a decode or a microphone start is in flight.
    pub fn has_pending_work(&self) -> bool {
        self.scheduler.has_pending() || self.mic_ready.is_some()
    }

    /// Next finished piece of background work; pending forever when there
    /// is none.
    pub async fn next_completion(&mut self) -> Completion {
        let scheduler = &mut self.scheduler;
        let decoding = scheduler.has_pending();
        let starting = self.mic_ready.is_some();

        let completion = tokio::select! {
            Some(outcome) = scheduler.next_decoded(), if decoding => Completion::Decoded(outcome),
            result = mic_started(&mut self.mic_ready), if starting => Completion::MicReady(result),
            else => std::future::pending().await,
        };
        if matches!(completion, Completion::MicReady(_)) {
            self.mic_ready = None;
        }
        completion
    }

    /// Apply a completion; returns the spans a decode scheduled.
    pub fn on_completion(&mut self, completion: Completion) -> Vec<ScheduledSpan> {
        match completion {
            Completion::Decoded(outcome) => self.on_decoded(outcome),
            Completion::MicReady(result) => {
                self.on_mic_ready(result);
                Vec::new()
            }
        }
    }

    /// Schedule a finished decode and release the captions it unlocks.
    pub fn on_decoded(&mut self, outcome: DecodeOutcome) -> Vec<ScheduledSpan> {
        let spans = self.scheduler.on_decoded(outcome);
        self.release_captions(&spans);
        spans
    }

    /// Display-rate housekeeping: startup-buffer timeout and energy meter.
    pub fn tick(&mut self) -> Vec<ScheduledSpan> {
        let spans = self.scheduler.poll_startup();
        self.release_captions(&spans);
        let energy = self.scheduler.sample_energy();
        self.state.lock().energy = energy;
        spans
    }

    fn release_captions(&mut self, spans: &[ScheduledSpan]) {
        for span in spans {
            let ready = self.captions.on_scheduled(span.seq);
            self.append_assistant(ready);
        }
    }

    // -----------------------------------------------------------------------
    // Commands and outbound intents
    // -----------------------------------------------------------------------

    /// Handle a window command that does not change the connection.
    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetMic(on) => self.set_mic(on),
            SessionCommand::ToggleMic => {
                let on = !self.mic.is_enabled();
                self.set_mic(on);
            }
            SessionCommand::SendText(text) => self.send_text(&text),
            SessionCommand::Interrupt => self.interrupt(),
            SessionCommand::Connect | SessionCommand::Disconnect | SessionCommand::Shutdown => {
                log::debug!("session: {command:?} is handled by the connection driver");
            }
        }
    }

    fn set_mic(&mut self, on: bool) {
        if !on {
            self.mic_ready = None;
            self.mic.disable();
            self.state.lock().mic_enabled = false;
            return;
        }

        if !self.connection().is_connected() {
            self.notice("Connect before enabling the microphone");
            return;
        }

        if let Some(ready) = self.mic.enable(self.packet_tx.clone()) {
            log::debug!("session: opening microphone");
            self.mic_ready = Some(ready);
        }
    }

    fn on_mic_ready(&mut self, result: Result<(), CaptureError>) {
        match result {
            Ok(()) => {
                log::info!("session: microphone live");
                self.state.lock().mic_enabled = true;
            }
            Err(e) => {
                self.mic.disable();
                self.mic_failed(e);
            }
        }
    }

    fn mic_failed(&mut self, e: CaptureError) {
        log::warn!("session: microphone unavailable: {e}");
        let mut st = self.state.lock();
        st.mic_enabled = false;
        st.push_notice(format!("Microphone unavailable: {e}"));
    }

    /// Forward one captured packet if the call is live and the mic is on.
    pub fn on_packet(&mut self, packet: VoicePacket) {
        let live = {
            let st = self.state.lock();
            st.connection.is_connected() && st.mic_enabled
        };
        if live {
            self.send(ClientMessage::AudioChunk {
                chunk: packet.to_base64(),
            });
        }
    }

    /// Send typed input, cutting off any reply that is still playing.
    pub fn send_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.connection().is_connected() {
            self.notice("Not connected; text not sent");
            return;
        }
        self.scheduler.cancel();
        self.captions.clear();
        {
            let mut st = self.state.lock();
            st.transcript.begin_user_turn(text);
            st.energy = 0.0;
        }
        self.send(ClientMessage::Text {
            text: text.to_owned(),
        });
    }

    /// Explicit barge-in: stop playback and tell the peer.
    pub fn interrupt(&mut self) {
        self.scheduler.cancel();
        self.captions.clear();
        self.state.lock().energy = 0.0;
        if self.connection().is_connected() {
            self.send(ClientMessage::Interrupt);
        }
    }
}

async fn mic_started(ready: &mut Option<MicReady>) -> Result<(), CaptureError> {
    match ready {
        Some(rx) => rx.await.unwrap_or(Err(CaptureError::WorkerGone)),
        None => std::future::pending().await,
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.mic.disable();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
