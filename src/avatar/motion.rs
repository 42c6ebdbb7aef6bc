//! Per-frame character animation.
//!
//! [`MotionController::update`] is called once per display frame with a
//! [`MotionInput`] and returns a [`Pose`]:
//!
//! ```text
//! blink    random gap in [min, max], then closed for close_ms
//! breath   sin(2π t / period) × amp_px         → translate_y
//! sway     sin(2π t / period) × deg            → rotate_deg
//! lipsync  energy × sensitivity, smoothed      → mouth level 0 / 1 / 2
//! reaction keyframes, interpolated             → added to the above
//! ```
//!
//! Breath and sway start at a random phase so two characters never move in
//! lockstep.  All state lives in the controller; there is no global clock.

use std::collections::HashMap;
use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::character::{CharacterConfig, Keyframe, ReactionProp};

/// Smoothed energy at or above this opens the mouth fully.
pub const MOUTH_OPEN_THRESHOLD: f32 = 0.66;
/// Smoothed energy at or above this half-opens the mouth.
pub const MOUTH_HALF_THRESHOLD: f32 = 0.33;

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouthLevel {
    #[default]
    Closed,
    Half,
    Open,
}

impl MouthLevel {
    /// Bucket a `[0, 1]` energy value.
    pub fn from_energy(energy: f32) -> Self {
        if energy >= MOUTH_OPEN_THRESHOLD {
            MouthLevel::Open
        } else if energy >= MOUTH_HALF_THRESHOLD {
            MouthLevel::Half
        } else {
            MouthLevel::Closed
        }
    }

    pub fn index(self) -> u8 {
        match self {
            MouthLevel::Closed => 0,
            MouthLevel::Half => 1,
            MouthLevel::Open => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Idle,
    Speaking,
    TouchReaction,
}

impl MotionState {
    pub fn label(&self) -> &'static str {
        match self {
            MotionState::Idle => "idle",
            MotionState::Speaking => "speaking",
            MotionState::TouchReaction => "touch_reaction",
        }
    }
}

/// Global transform applied to the whole stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translate_x: f32,
    pub translate_y: f32,
    pub rotate_deg: f32,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translate_x: 0.0,
            translate_y: 0.0,
            rotate_deg: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pose {
    pub blink_closed: bool,
    pub mouth: MouthLevel,
    /// Smoothed, sensitivity-scaled energy behind `mouth`.
    pub mouth_energy: f32,
    pub reaction: Option<String>,
    pub transform: Transform,
    pub state: MotionState,
}

// ---------------------------------------------------------------------------
// MotionInput
// ---------------------------------------------------------------------------

/// Everything one frame depends on.
#[derive(Debug, Clone, Copy)]
pub struct MotionInput<'a> {
    /// Monotonic milliseconds.
    pub now_ms: f64,
    pub config: &'a CharacterConfig,
    pub speaking: bool,
    /// Live playback energy in `[0, 1]`.
    pub energy: f32,
}

// ---------------------------------------------------------------------------
// MotionController
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ActiveReaction {
    id: String,
    started_ms: f64,
    duration_ms: f64,
    timeline: Vec<Keyframe>,
}

#[derive(Debug)]
pub struct MotionController {
    rng: StdRng,
    breath_phase: f64,
    sway_phase: f64,
    next_blink_ms: Option<f64>,
    blink_until_ms: Option<f64>,
    mouth_energy: f32,
    last_update_ms: Option<f64>,
    reaction: Option<ActiveReaction>,
    /// Reaction id → last trigger time.
    cooldowns: HashMap<String, f64>,
    reduced_motion: bool,
}

impl Default for MotionController {
    fn default() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }
}

impl MotionController {
    /// Deterministic controller; the same seed yields the same blinks and
    /// phases.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let breath_phase = rng.random_range(0.0..TAU);
        let sway_phase = rng.random_range(0.0..TAU);
        Self {
            rng,
            breath_phase,
            sway_phase,
            next_blink_ms: None,
            blink_until_ms: None,
            mouth_energy: 0.0,
            last_update_ms: None,
            reaction: None,
            cooldowns: HashMap::new(),
            reduced_motion: false,
        }
    }

    /// Disable blink, breath and sway, and make lipsync follow energy
    /// without smoothing.
    pub fn set_reduced_motion(&mut self, reduced: bool) {
        self.reduced_motion = reduced;
        if reduced {
            self.next_blink_ms = None;
            self.blink_until_ms = None;
        }
    }

    pub fn reduced_motion(&self) -> bool {
        self.reduced_motion
    }

    /// Start reaction `id`.  Returns `false` for unknown ids and while the
    /// reaction is cooling down.
    pub fn trigger_reaction(&mut self, id: &str, now_ms: f64, config: &CharacterConfig) -> bool {
        let Some(reaction) = config.reaction(id) else {
            log::debug!("motion: no reaction named {id:?}");
            return false;
        };
        if let Some(&last) = self.cooldowns.get(id) {
            if now_ms - last < reaction.cooldown_ms {
                return false;
            }
        }
        self.cooldowns.insert(id.to_owned(), now_ms);
        self.reaction = Some(ActiveReaction {
            id: id.to_owned(),
            started_ms: now_ms,
            duration_ms: reaction.duration_ms(),
            timeline: reaction.timeline.clone(),
        });
        true
    }

    pub fn active_reaction(&self) -> Option<&str> {
        self.reaction.as_ref().map(|r| r.id.as_str())
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    pub fn update(&mut self, input: MotionInput<'_>) -> Pose {
        let motions = &input.config.motions;
        let now = input.now_ms;
        let dt = self.last_update_ms.map_or(0.0, |last| (now - last).max(0.0));
        self.last_update_ms = Some(now);

        let mut transform = Transform::default();

        let blink_closed = if motions.idle_blink.enabled && !self.reduced_motion {
            self.blink(now, input.config)
        } else {
            false
        };

        if !self.reduced_motion {
            let breath = &motions.idle_breath;
            if breath.enabled {
                let angle = TAU * now / breath.period_ms + self.breath_phase;
                transform.translate_y += (angle.sin() as f32) * breath.amp_px;
            }
            let sway = &motions.idle_sway;
            if sway.enabled {
                let angle = TAU * now / sway.period_ms + self.sway_phase;
                transform.rotate_deg += (angle.sin() as f32) * sway.deg;
            }
        }

        let lipsync = &motions.speaking_lipsync;
        let target = if input.speaking && lipsync.enabled {
            (input.energy * lipsync.sensitivity).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let alpha = if self.reduced_motion || lipsync.smooth_ms <= 0.0 {
            1.0
        } else {
            1.0 - (-dt / lipsync.smooth_ms).exp() as f32
        };
        self.mouth_energy += (target - self.mouth_energy) * alpha;
        let mouth = MouthLevel::from_energy(self.mouth_energy);

        let reaction = self.apply_reaction(now, &mut transform);

        let state = if reaction.is_some() {
            MotionState::TouchReaction
        } else if input.speaking {
            MotionState::Speaking
        } else {
            MotionState::Idle
        };

        Pose {
            blink_closed,
            mouth,
            mouth_energy: self.mouth_energy,
            reaction,
            transform,
            state,
        }
    }

    fn blink(&mut self, now: f64, config: &CharacterConfig) -> bool {
        let blink = &config.motions.idle_blink;
        if let Some(until) = self.blink_until_ms {
            if now < until {
                return true;
            }
            self.blink_until_ms = None;
            self.next_blink_ms = Some(now + self.blink_gap(blink.min_gap_ms, blink.max_gap_ms));
            return false;
        }
        match self.next_blink_ms {
            None => {
                self.next_blink_ms = Some(now + self.blink_gap(blink.min_gap_ms, blink.max_gap_ms));
                false
            }
            Some(due) if now >= due => {
                self.blink_until_ms = Some(now + blink.close_ms);
                true
            }
            Some(_) => false,
        }
    }

    fn blink_gap(&mut self, min: f64, max: f64) -> f64 {
        if max > min {
            self.rng.random_range(min..=max)
        } else {
            min
        }
    }

    fn apply_reaction(&mut self, now: f64, transform: &mut Transform) -> Option<String> {
        let active = self.reaction.as_ref()?;
        let elapsed = now - active.started_ms;
        if elapsed > active.duration_ms {
            self.reaction = None;
            return None;
        }
        for prop in [
            ReactionProp::TranslateX,
            ReactionProp::TranslateY,
            ReactionProp::RotateDeg,
            ReactionProp::Scale,
        ] {
            let Some(v) = sample(&active.timeline, prop, elapsed) else {
                continue;
            };
            match prop {
                ReactionProp::TranslateX => transform.translate_x += v,
                ReactionProp::TranslateY => transform.translate_y += v,
                ReactionProp::RotateDeg => transform.rotate_deg += v,
                ReactionProp::Scale => transform.scale *= v,
            }
        }
        Some(active.id.clone())
    }
}

/// Value of `prop` at `t`: linear between bracketing keyframes, held at the
/// ends.  `None` if the timeline never mentions `prop`.
fn sample(timeline: &[Keyframe], prop: ReactionProp, t: f64) -> Option<f32> {
    let mut frames = timeline.iter().filter(|k| k.prop == prop);
    let first = frames.next()?;
    if t <= first.t {
        return Some(first.v);
    }
    let mut prev = first;
    for next in frames {
        if t <= next.t {
            let span = next.t - prev.t;
            if span <= 0.0 {
                return Some(next.v);
            }
            let f = ((t - prev.t) / span) as f32;
            return Some(prev.v + (next.v - prev.v) * f);
        }
        prev = next;
    }
    Some(prev.v)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::character::Reaction;

    fn still_config() -> CharacterConfig {
        let mut config = CharacterConfig::default();
        config.motions.idle_breath.enabled = false;
        config.motions.idle_sway.enabled = false;
        config.motions.idle_blink.enabled = false;
        config.motions.speaking_lipsync.smooth_ms = 0.0;
        config
    }

    fn frame(config: &CharacterConfig, now_ms: f64, speaking: bool, energy: f32) -> MotionInput<'_> {
        MotionInput {
            now_ms,
            config,
            speaking,
            energy,
        }
    }

    #[test]
    fn mouth_thresholds() {
        assert_eq!(MouthLevel::from_energy(0.0), MouthLevel::Closed);
        assert_eq!(MouthLevel::from_energy(0.32), MouthLevel::Closed);
        assert_eq!(MouthLevel::from_energy(0.33), MouthLevel::Half);
        assert_eq!(MouthLevel::from_energy(0.5), MouthLevel::Half);
        assert_eq!(MouthLevel::from_energy(0.66), MouthLevel::Open);
        assert_eq!(MouthLevel::from_energy(1.0), MouthLevel::Open);
    }

    #[test]
    fn lipsync_levels_follow_energy() {
        let config = still_config();
        let mut motion = MotionController::with_seed(1);
        assert_eq!(motion.update(frame(&config, 0.0, true, 0.0)).mouth.index(), 0);
        assert_eq!(motion.update(frame(&config, 16.0, true, 0.5)).mouth.index(), 1);
        assert_eq!(motion.update(frame(&config, 32.0, true, 0.7)).mouth.index(), 2);
        // Not speaking forces the mouth shut.
        assert_eq!(motion.update(frame(&config, 48.0, false, 0.9)).mouth.index(), 0);
    }

    #[test]
    fn lipsync_level_is_monotonic_in_energy() {
        let config = still_config();
        let mut last = 0;
        for step in 0..=100 {
            let energy = step as f32 / 100.0;
            let mut motion = MotionController::with_seed(2);
            let level = motion.update(frame(&config, 0.0, true, energy)).mouth.index();
            assert!(level >= last, "level dropped at energy {energy}");
            last = level;
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn lipsync_smoothing_lags_then_converges() {
        let mut config = still_config();
        config.motions.speaking_lipsync.smooth_ms = 90.0;
        let mut motion = MotionController::with_seed(3);
        motion.update(frame(&config, 0.0, true, 1.0));
        let early = motion.update(frame(&config, 16.0, true, 1.0));
        assert!(early.mouth_energy > 0.0 && early.mouth_energy < 0.66);

        let mut pose = early;
        for i in 2..100 {
            pose = motion.update(frame(&config, i as f64 * 16.0, true, 1.0));
        }
        assert_eq!(pose.mouth, MouthLevel::Open);
    }

    #[test]
    fn sensitivity_scales_energy() {
        let mut config = still_config();
        config.motions.speaking_lipsync.sensitivity = 2.0;
        let mut motion = MotionController::with_seed(4);
        assert_eq!(motion.update(frame(&config, 0.0, true, 0.4)).mouth, MouthLevel::Open);
    }

    #[test]
    fn reaction_cooldown_rejects_retrigger() {
        let config = still_config();
        let mut motion = MotionController::with_seed(5);
        assert!(motion.trigger_reaction("pat_head", 1000.0, &config));
        assert!(!motion.trigger_reaction("pat_head", 1500.0, &config));
        assert!(motion.trigger_reaction("pat_head", 1800.0, &config));
        // Cooldowns are per reaction.
        assert!(motion.trigger_reaction("tap_face", 1810.0, &config));
    }

    #[test]
    fn unknown_reaction_is_inert() {
        let config = still_config();
        let mut motion = MotionController::with_seed(6);
        assert!(!motion.trigger_reaction("dance", 0.0, &config));
        assert_eq!(motion.update(frame(&config, 0.0, false, 0.0)).state, MotionState::Idle);
    }

    #[test]
    fn reaction_interpolates_then_ends() {
        let config = still_config();
        let mut motion = MotionController::with_seed(7);
        assert!(motion.trigger_reaction("pat_head", 0.0, &config));

        let pose = motion.update(frame(&config, 60.0, true, 0.0));
        assert_eq!(pose.state, MotionState::TouchReaction);
        assert_eq!(pose.reaction.as_deref(), Some("pat_head"));
        assert!((pose.transform.translate_y - -4.0).abs() < 1e-4);

        let pose = motion.update(frame(&config, 120.0, true, 0.0));
        assert!((pose.transform.translate_y - -8.0).abs() < 1e-4);

        let pose = motion.update(frame(&config, 261.0, true, 0.0));
        assert_eq!(pose.reaction, None);
        assert_eq!(pose.state, MotionState::Speaking);
        assert_eq!(pose.transform.translate_y, 0.0);
    }

    #[test]
    fn scale_reaction_multiplies() {
        let config = still_config();
        let mut motion = MotionController::with_seed(8);
        motion.trigger_reaction("tap_chest", 0.0, &config);
        let pose = motion.update(frame(&config, 120.0, false, 0.0));
        assert!((pose.transform.scale - 1.015).abs() < 1e-5);
    }

    #[test]
    fn sample_clamps_outside_span() {
        let reaction = Reaction {
            id: "r".into(),
            label: "r".into(),
            cooldown_ms: 0.0,
            timeline: vec![
                Keyframe { target: "global".into(), prop: ReactionProp::RotateDeg, t: 100.0, v: 2.0 },
                Keyframe { target: "global".into(), prop: ReactionProp::RotateDeg, t: 200.0, v: 6.0 },
            ],
        };
        assert_eq!(sample(&reaction.timeline, ReactionProp::RotateDeg, 0.0), Some(2.0));
        assert_eq!(sample(&reaction.timeline, ReactionProp::RotateDeg, 150.0), Some(4.0));
        assert_eq!(sample(&reaction.timeline, ReactionProp::RotateDeg, 500.0), Some(6.0));
        assert_eq!(sample(&reaction.timeline, ReactionProp::Scale, 150.0), None);
    }

    #[test]
    fn blink_closes_within_gap_bounds() {
        let mut config = CharacterConfig::default();
        config.motions.idle_breath.enabled = false;
        config.motions.idle_sway.enabled = false;
        let blink = config.motions.idle_blink.clone();

        let mut motion = MotionController::with_seed(9);
        let mut closed_at = None;
        let mut t = 0.0;
        while t < blink.max_gap_ms + 100.0 {
            if motion.update(frame(&config, t, false, 0.0)).blink_closed {
                closed_at = Some(t);
                break;
            }
            t += 10.0;
        }
        let closed_at = closed_at.expect("blinked");
        assert!(closed_at >= blink.min_gap_ms && closed_at <= blink.max_gap_ms + 10.0);

        // Stays closed for close_ms, then opens.
        assert!(motion.update(frame(&config, closed_at + blink.close_ms - 10.0, false, 0.0)).blink_closed);
        assert!(!motion.update(frame(&config, closed_at + blink.close_ms, false, 0.0)).blink_closed);
    }

    #[test]
    fn reduced_motion_holds_still() {
        let config = CharacterConfig::default();
        let mut motion = MotionController::with_seed(10);
        motion.set_reduced_motion(true);
        for i in 0..1000 {
            let pose = motion.update(frame(&config, i as f64 * 10.0, false, 0.0));
            assert!(!pose.blink_closed);
            assert_eq!(pose.transform, Transform::default());
        }
        // Lipsync is unsmoothed.
        let pose = motion.update(frame(&config, 10_000.0, true, 0.8));
        assert_eq!(pose.mouth, MouthLevel::Open);
    }

    #[test]
    fn seeds_desynchronise_idle_motion() {
        let config = CharacterConfig::default();
        let a = MotionController::with_seed(11).update(frame(&config, 500.0, false, 0.0));
        let b = MotionController::with_seed(12).update(frame(&config, 500.0, false, 0.0));
        assert_ne!(a.transform, b.transform);
    }
}
