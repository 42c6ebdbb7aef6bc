//! Desktop voice-call client with an animated character.
//!
//! The binary in `main.rs` wires these together; everything below is usable
//! (and tested) without a window or audio hardware.

pub mod app;
pub mod audio;
pub mod avatar;
pub mod config;
pub mod playback;
pub mod protocol;
pub mod session;
