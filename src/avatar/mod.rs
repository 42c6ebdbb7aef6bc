//! On-screen character.
//!
//! ```text
//! CharacterSource ──▶ CharacterConfig ─┐
//! SharedState (emotion, energy, phase) ┼─▶ MotionController ──Pose──▶ compose ──▶ layers
//! pointer ──▶ hit_test ──▶ trigger_reaction ┘
//! ```
//!
//! Everything here runs on the render clock and is a pure function of its
//! inputs plus the controller's own state.

pub mod api;
pub mod character;
pub mod compositor;
pub mod emotion;
pub mod motion;

pub use api::{asset_url, load_config_or_default, CharacterApiError, CharacterSource, HttpCharacterSource};
pub use character::{
    default_hit_areas, default_reactions, Canvas, CharacterConfig, CharacterRecord, HitArea,
    Keyframe, Motions, Part, PartScope, Reaction, ReactionProp, Slot,
};
pub use compositor::{compose, hit_test, normalize_point, Composition, Layer, LayerSource, Placement};
pub use emotion::Emotion;
pub use motion::{MotionController, MotionInput, MotionState, MouthLevel, Pose, Transform};
