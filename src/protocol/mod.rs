//! Call socket wire protocol.

pub mod messages;

pub use messages::{CallPhase, ClientMessage, PlaybackAdvisory, ProtocolError, ServerMessage};
