//! Call session: protocol state machine, dialogue history and the socket
//! driver.
//!
//! ```text
//! window ──SessionCommand──▶ run_session ──▶ SessionController ──▶ SharedState ──▶ window
//!                                 ▲                 │
//!                            socket frames     PlaybackScheduler
//! ```

pub mod captions;
pub mod connection;
pub mod controller;
pub mod state;
pub mod transcript;

pub use captions::CaptionBuffer;
pub use connection::{run_session, SessionHandle, TransportError};
pub use controller::{Completion, SessionCommand, SessionController, PACKET_QUEUE};
pub use state::{CallStatus, ConnectionState, SharedState};
pub use transcript::{DialogueTurn, Transcript, DEFAULT_MAX_TURNS};
