//! Connection lifecycle and the shared call status.
//!
//! [`CallStatus`] is the single source of truth for everything the window
//! shows: connection state, session id, call phase, microphone flag, live
//! emotion and speech energy, the live caption, dialogue history and recent
//! notices.  The session loop mutates it; the egui update loop reads it each
//! frame through [`SharedState`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::avatar::Emotion;
use crate::protocol::CallPhase;
use crate::session::transcript::Transcript;

/// Notices kept for the status panel.
const MAX_NOTICES: usize = 20;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// ```text
/// Disconnected ──connect──▶ Connecting ──server.hello──▶ Connected
///      ▲                        │                           │
///      └──── close / error ─────┴───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

// ---------------------------------------------------------------------------
// CallStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CallStatus {
    pub connection: ConnectionState,
    /// Assigned by the peer in `server.hello`.
    pub session_id: Option<String>,
    pub phase: CallPhase,
    pub mic_enabled: bool,
    pub emotion: Emotion,
    /// Smoothed playback loudness in `[0, 1]`.
    pub energy: f32,
    /// Partial user transcript, cleared when it is finalized.
    pub live_caption: String,
    pub transcript: Transcript,
    /// Newest last.
    pub notices: VecDeque<String>,
}

impl CallStatus {
    pub fn push_notice(&mut self, notice: impl Into<String>) {
        self.notices.push_back(notice.into());
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
    }

    /// `true` while assistant audio is playing.
    pub fn is_speaking(&self) -> bool {
        self.phase == CallPhase::Speaking
    }

    /// Back to a disconnected call, keeping history and notices.
    pub fn reset_call(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.session_id = None;
        self.phase = CallPhase::Idle;
        self.mic_enabled = false;
        self.energy = 0.0;
        self.live_caption.clear();
        self.transcript.close_turn();
    }
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`CallStatus`].  Do not hold the lock across
/// `.await` points.
#[derive(Clone, Default)]
pub struct SharedState(Arc<Mutex<CallStatus>>);

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panic elsewhere must not blank the window.
    pub fn lock(&self) -> MutexGuard<'_, CallStatus> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy for one frame.  Transcript history is shared, not cloned.
    pub fn snapshot(&self) -> CallStatus {
        self.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(ConnectionState::Disconnected.label(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.label(), "Connecting");
        assert_eq!(ConnectionState::Connected.label(), "Connected");
        assert!(!ConnectionState::Connecting.is_connected());
    }

    #[test]
    fn default_status_is_disconnected_and_idle() {
        let status = CallStatus::default();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert_eq!(status.phase, CallPhase::Idle);
        assert_eq!(status.emotion, Emotion::Neutral);
        assert!(!status.mic_enabled);
    }

    #[test]
    fn notices_are_bounded() {
        let mut status = CallStatus::default();
        for i in 0..30 {
            status.push_notice(format!("n{i}"));
        }
        assert_eq!(status.notices.len(), MAX_NOTICES);
        assert_eq!(status.notices.front().map(String::as_str), Some("n10"));
    }

    #[test]
    fn reset_call_keeps_history() {
        let mut status = CallStatus::default();
        status.connection = ConnectionState::Connected;
        status.session_id = Some("abc".into());
        status.mic_enabled = true;
        status.transcript.begin_user_turn("hello");

        status.reset_call();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert!(status.session_id.is_none());
        assert!(!status.mic_enabled);
        assert_eq!(status.transcript.len(), 1);
    }

    #[test]
    fn shared_state_is_send_sync_and_shared() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedState>();

        let a = SharedState::new();
        let b = a.clone();
        a.lock().phase = CallPhase::Speaking;
        assert!(b.lock().is_speaking());
    }
}
