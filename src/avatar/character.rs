//! Declarative character configuration.
//!
//! A character is a canvas, an optional full-body image per emotion, a list
//! of layered [`Part`]s, rectangular [`HitArea`]s bound to [`Reaction`]s, and
//! [`Motions`] parameters.  The configuration is read-only input to the
//! motion controller and compositor.
//!
//! Reading never fails.  Every field is coerced and clamped on its own (a
//! numeric string or a float works where an integer is expected), entries
//! without an id, slot or asset are logged and skipped, and missing
//! sections get their stock defaults.  A broken character renders with less,
//! never crashes the frame loop.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::emotion::Emotion;

pub const SCHEMA_VERSION: &str = "1.0";
pub const DEFAULT_CANVAS_WIDTH: u32 = 1080;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1440;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Layer category the compositor knows how to choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    BodyBase,
    EyesOpen,
    EyesClosed,
    MouthClosed,
    MouthHalf,
    MouthOpen,
    BrowNeutral,
    BrowHappy,
    BrowSad,
    BrowAngry,
    FxBlush,
    FxSweat,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::BodyBase => "body_base",
            Slot::EyesOpen => "eyes_open",
            Slot::EyesClosed => "eyes_closed",
            Slot::MouthClosed => "mouth_closed",
            Slot::MouthHalf => "mouth_half",
            Slot::MouthOpen => "mouth_open",
            Slot::BrowNeutral => "brow_neutral",
            Slot::BrowHappy => "brow_happy",
            Slot::BrowSad => "brow_sad",
            Slot::BrowAngry => "brow_angry",
            Slot::FxBlush => "fx_blush",
            Slot::FxSweat => "fx_sweat",
        }
    }

    pub const ALL: [Slot; 12] = [
        Slot::BodyBase,
        Slot::EyesOpen,
        Slot::EyesClosed,
        Slot::MouthClosed,
        Slot::MouthHalf,
        Slot::MouthOpen,
        Slot::BrowNeutral,
        Slot::BrowHappy,
        Slot::BrowSad,
        Slot::BrowAngry,
        Slot::FxBlush,
        Slot::FxSweat,
    ];

    /// `None` for free-form slot names.
    pub fn parse(name: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| slot.as_str() == name)
    }
}

// ---------------------------------------------------------------------------
// PartScope
// ---------------------------------------------------------------------------

/// Which emotion a part belongs to.  Unknown names widen to `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartScope {
    #[default]
    All,
    Only(Emotion),
}

impl From<String> for PartScope {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("all") {
            return PartScope::All;
        }
        Emotion::parse(&value).map_or(PartScope::All, PartScope::Only)
    }
}

impl From<PartScope> for String {
    fn from(scope: PartScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for PartScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartScope::All => f.write_str("all"),
            PartScope::Only(emotion) => f.write_str(emotion.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
        }
    }
}

impl Canvas {
    fn read(f: Fields<'_>) -> Self {
        Self {
            width: f.int("width", DEFAULT_CANVAS_WIDTH.into(), 256, 4096) as u32,
            height: f.int("height", DEFAULT_CANVAS_HEIGHT.into(), 256, 4096) as u32,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

// ---------------------------------------------------------------------------
// Part
// ---------------------------------------------------------------------------

/// One image layer.  `slot` names outside [`Slot`] are free-form extras.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub part_id: String,
    pub slot: String,
    pub emotion: PartScope,
    pub asset_id: String,
    pub z: i32,
    pub anchor_x: f32,
    pub anchor_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub scale: f32,
    pub rotate_deg: f32,
    pub opacity: f32,
    pub enabled: bool,
}

impl Part {
    pub fn slot_kind(&self) -> Option<Slot> {
        Slot::parse(&self.slot)
    }

    /// `None` when the part cannot be drawn at all.
    fn read(f: Fields<'_>) -> Option<Self> {
        let slot = f.text("slot")?.to_owned();
        let asset_id = f.text("asset_id")?.to_owned();
        Some(Self {
            part_id: f.text("part_id").map_or_else(new_part_id, str::to_owned),
            slot,
            emotion: f.text("emotion").map_or(PartScope::All, |e| PartScope::from(e.to_owned())),
            asset_id,
            z: f.int("z", 0, -9999, 9999) as i32,
            anchor_x: f.float32("anchor_x", 0.5, -2.0, 2.0),
            anchor_y: f.float32("anchor_y", 1.0, -2.0, 2.0),
            offset_x: f.float32("offset_x", 0.0, -4096.0, 4096.0),
            offset_y: f.float32("offset_y", 0.0, -4096.0, 4096.0),
            scale: f.float32("scale", 1.0, 0.01, 8.0),
            rotate_deg: f.float32("rotate_deg", 0.0, -360.0, 360.0),
            opacity: f.float32("opacity", 1.0, 0.0, 1.0),
            enabled: f.flag("enabled", true),
        })
    }
}

// ---------------------------------------------------------------------------
// HitArea
// ---------------------------------------------------------------------------

/// Normalised rectangle bound to a reaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitArea {
    pub id: String,
    pub label: String,
    pub shape: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub reaction_id: String,
    pub enabled: bool,
}

impl HitArea {
    /// Only rectangles are supported.
    fn read(f: Fields<'_>) -> Option<Self> {
        let id = f.text("id")?;
        if f.text("shape").is_some_and(|shape| !shape.eq_ignore_ascii_case("rect")) {
            return None;
        }
        Some(Self {
            id: id.to_owned(),
            label: f.text("label").unwrap_or(id).to_owned(),
            shape: "rect".into(),
            x: f.float32("x", 0.0, 0.0, 1.0),
            y: f.float32("y", 0.0, 0.0, 1.0),
            w: f.float32("w", 0.1, 0.01, 1.0),
            h: f.float32("h", 0.1, 0.01, 1.0),
            reaction_id: f.text("reaction_id").unwrap_or_default().to_owned(),
            enabled: f.flag("enabled", true),
        })
    }

    /// Edges are inclusive.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.w && y >= self.y && y <= self.y + self.h
    }

    fn stock(id: &str, label: &str, rect: [f32; 4], reaction_id: &str) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            shape: "rect".into(),
            x: rect[0],
            y: rect[1],
            w: rect[2],
            h: rect[3],
            reaction_id: reaction_id.into(),
            enabled: true,
        }
    }
}

/// Head pat, both cheeks and the chest.
pub fn default_hit_areas() -> Vec<HitArea> {
    vec![
        HitArea::stock("head", "head", [0.33, 0.04, 0.34, 0.18], "pat_head"),
        HitArea::stock("face_left", "left cheek", [0.22, 0.20, 0.20, 0.20], "tap_face"),
        HitArea::stock("face_right", "right cheek", [0.58, 0.20, 0.20, 0.20], "tap_face"),
        HitArea::stock("chest", "chest", [0.36, 0.42, 0.28, 0.24], "tap_chest"),
    ]
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// Global transform property a keyframe drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReactionProp {
    TranslateX,
    TranslateY,
    RotateDeg,
    Scale,
}

impl ReactionProp {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "translateX" => Some(ReactionProp::TranslateX),
            "translateY" => Some(ReactionProp::TranslateY),
            "rotateDeg" => Some(ReactionProp::RotateDeg),
            "scale" => Some(ReactionProp::Scale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyframe {
    pub target: String,
    pub prop: ReactionProp,
    /// Milliseconds from reaction start.
    pub t: f64,
    pub v: f32,
}

impl Keyframe {
    /// Only the global target is animated; other targets and unknown
    /// properties are skipped.
    fn read(f: Fields<'_>) -> Option<Self> {
        let target = f.text("target").unwrap_or("global");
        if target != "global" {
            return None;
        }
        Some(Self {
            target: target.to_owned(),
            prop: ReactionProp::parse(f.text("prop")?)?,
            t: f.float("t", 0.0, 0.0, 60_000.0).trunc(),
            v: f.float32("v", 0.0, -4096.0, 4096.0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reaction {
    pub id: String,
    pub label: String,
    pub cooldown_ms: f64,
    /// Sorted by `t`.
    pub timeline: Vec<Keyframe>,
}

impl Reaction {
    fn read(f: Fields<'_>) -> Option<Self> {
        let id = f.text("id")?;
        let mut timeline = list(f.get("timeline"), "keyframe", Keyframe::read);
        timeline.sort_by(|a, b| a.t.total_cmp(&b.t));
        Some(Self {
            id: id.to_owned(),
            label: f.text("label").unwrap_or(id).to_owned(),
            cooldown_ms: f.float("cooldown_ms", 800.0, 0.0, 60_000.0),
            timeline,
        })
    }

    /// Time of the last keyframe.
    pub fn duration_ms(&self) -> f64 {
        self.timeline.last().map_or(0.0, |k| k.t)
    }

    fn stock(id: &str, label: &str, cooldown_ms: f64, prop: ReactionProp, steps: [(f64, f32); 3]) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            cooldown_ms,
            timeline: steps
                .iter()
                .map(|&(t, v)| Keyframe {
                    target: "global".into(),
                    prop,
                    t,
                    v,
                })
                .collect(),
        }
    }
}

/// Small bob, cheek nudge, chest pulse.
pub fn default_reactions() -> Vec<Reaction> {
    vec![
        Reaction::stock(
            "pat_head",
            "pat head",
            800.0,
            ReactionProp::TranslateY,
            [(0.0, 0.0), (120.0, -8.0), (260.0, 0.0)],
        ),
        Reaction::stock(
            "tap_face",
            "tap face",
            650.0,
            ReactionProp::TranslateX,
            [(0.0, 0.0), (90.0, 4.0), (180.0, 0.0)],
        ),
        Reaction::stock(
            "tap_chest",
            "tap chest",
            650.0,
            ReactionProp::Scale,
            [(0.0, 1.0), (120.0, 1.015), (240.0, 1.0)],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Motions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlinkMotion {
    pub enabled: bool,
    pub min_gap_ms: f64,
    pub max_gap_ms: f64,
    pub close_ms: f64,
}

impl Default for BlinkMotion {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gap_ms: 2200.0,
            max_gap_ms: 5200.0,
            close_ms: 110.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreathMotion {
    pub enabled: bool,
    pub amp_px: f32,
    pub period_ms: f64,
}

impl Default for BreathMotion {
    fn default() -> Self {
        Self {
            enabled: true,
            amp_px: 4.0,
            period_ms: 2400.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwayMotion {
    pub enabled: bool,
    pub deg: f32,
    pub period_ms: f64,
}

impl Default for SwayMotion {
    fn default() -> Self {
        Self {
            enabled: true,
            deg: 1.0,
            period_ms: 4200.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LipsyncMotion {
    pub enabled: bool,
    pub sensitivity: f32,
    pub smooth_ms: f64,
}

impl Default for LipsyncMotion {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 1.0,
            smooth_ms: 90.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Motions {
    pub idle_blink: BlinkMotion,
    pub idle_breath: BreathMotion,
    pub idle_sway: SwayMotion,
    pub speaking_lipsync: LipsyncMotion,
}

impl Motions {
    fn read(f: Fields<'_>) -> Self {
        let d = Motions::default();

        let blink = Fields::of(f.get("idle_blink"));
        let min_gap_ms = blink.float("min_gap_ms", d.idle_blink.min_gap_ms, 400.0, 10_000.0);
        let idle_blink = BlinkMotion {
            enabled: blink.flag("enabled", true),
            min_gap_ms,
            max_gap_ms: blink
                .float("max_gap_ms", d.idle_blink.max_gap_ms, 400.0, 15_000.0)
                .max(min_gap_ms),
            close_ms: blink.float("close_ms", d.idle_blink.close_ms, 40.0, 1200.0),
        };

        let breath = Fields::of(f.get("idle_breath"));
        let idle_breath = BreathMotion {
            enabled: breath.flag("enabled", true),
            amp_px: breath.float32("amp_px", d.idle_breath.amp_px, 0.0, 64.0),
            period_ms: breath.float("period_ms", d.idle_breath.period_ms, 200.0, 20_000.0),
        };

        let sway = Fields::of(f.get("idle_sway"));
        let idle_sway = SwayMotion {
            enabled: sway.flag("enabled", true),
            deg: sway.float32("deg", d.idle_sway.deg, 0.0, 25.0),
            period_ms: sway.float("period_ms", d.idle_sway.period_ms, 200.0, 20_000.0),
        };

        let lipsync = Fields::of(f.get("speaking_lipsync"));
        let speaking_lipsync = LipsyncMotion {
            enabled: lipsync.flag("enabled", true),
            sensitivity: lipsync.float32("sensitivity", d.speaking_lipsync.sensitivity, 0.1, 5.0),
            smooth_ms: lipsync.float("smooth_ms", d.speaking_lipsync.smooth_ms, 0.0, 1000.0),
        };

        Self {
            idle_blink,
            idle_breath,
            idle_sway,
            speaking_lipsync,
        }
    }
}

// ---------------------------------------------------------------------------
// CharacterConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct CharacterConfig {
    pub version: String,
    pub canvas: Canvas,
    /// Full-body image per emotion; absent means none.
    #[serde(rename = "fullMap")]
    pub full_map: HashMap<Emotion, String>,
    pub parts: Vec<Part>,
    #[serde(rename = "hitAreas")]
    pub hit_areas: Vec<HitArea>,
    pub reactions: Vec<Reaction>,
    pub motions: Motions,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.into(),
            canvas: Canvas::default(),
            full_map: HashMap::new(),
            parts: Vec::new(),
            hit_areas: default_hit_areas(),
            reactions: default_reactions(),
            motions: Motions::default(),
        }
    }
}

impl From<Value> for CharacterConfig {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl CharacterConfig {
    /// Build a clamped configuration from arbitrary JSON.  Each field is
    /// coerced on its own; only entries missing their identity are skipped.
    pub fn from_value(raw: &Value) -> Self {
        let mut out = Self::default();
        if !raw.is_object() {
            log::warn!("avatar: character config is not an object, using defaults");
            return out;
        }
        let f = Fields::of(Some(raw));

        out.canvas = Canvas::read(Fields::of(f.get("canvas")));

        if let Some(Value::Object(full)) = f.get("fullMap") {
            for emotion in Emotion::ALL {
                if let Some(asset) = full.get(emotion.as_str()).and_then(Value::as_str) {
                    let asset = asset.trim();
                    if !asset.is_empty() {
                        out.full_map.insert(emotion, asset.to_owned());
                    }
                }
            }
        }

        out.parts = list(f.get("parts"), "part", Part::read);
        if f.get("hitAreas").is_some_and(|v| !v.is_null()) {
            out.hit_areas = list(f.get("hitAreas"), "hit area", HitArea::read);
        }
        if f.get("reactions").is_some_and(|v| !v.is_null()) {
            out.reactions = list(f.get("reactions"), "reaction", Reaction::read);
        }
        out.motions = Motions::read(Fields::of(f.get("motions")));
        out
    }

    pub fn reaction(&self, id: &str) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.id == id)
    }

    /// Full-body image for `emotion`, falling back through neutral, happy
    /// and sad.  Returns the emotion whose image was chosen.
    pub fn full_body_for(&self, emotion: Emotion) -> Option<(Emotion, &str)> {
        [emotion, Emotion::Neutral, Emotion::Happy, Emotion::Sad]
            .into_iter()
            .find_map(|e| self.full_map.get(&e).map(|asset| (e, asset.as_str())))
    }
}

// ---------------------------------------------------------------------------
// CharacterRecord
// ---------------------------------------------------------------------------

/// A stored character as the character API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub character_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub renderer_kind: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub config: CharacterConfig,
}

// ---------------------------------------------------------------------------
// Field coercion
// ---------------------------------------------------------------------------

/// Read-only view of one JSON object.  Every accessor falls back on its own,
/// so one bad value never resets its neighbours.  A missing or non-object
/// value reads as all defaults.
#[derive(Clone, Copy)]
struct Fields<'a>(Option<&'a Map<String, Value>>);

impl<'a> Fields<'a> {
    fn of(value: Option<&'a Value>) -> Self {
        Self(value.and_then(Value::as_object))
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.and_then(|map| map.get(key))
    }

    /// Trimmed, non-empty string.
    fn text(&self, key: &str) -> Option<&'a str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Only real booleans count.
    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Integer from a number (fractions truncate) or an integer string.
    fn int(&self, key: &str, default: i64, lo: i64, hi: i64) -> i64 {
        let value = self.get(key).and_then(|v| match v {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        });
        value.unwrap_or(default).clamp(lo, hi)
    }

    /// Finite float from a number or a numeric string.
    fn float(&self, key: &str, default: f64, lo: f64, hi: f64) -> f64 {
        let value = self.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
        value.filter(|f| f.is_finite()).unwrap_or(default).clamp(lo, hi)
    }

    fn float32(&self, key: &str, default: f32, lo: f32, hi: f32) -> f32 {
        self.float(key, default.into(), lo.into(), hi.into()) as f32
    }
}

/// Read every entry of a JSON array, skipping the ones `read` rejects.
fn list<T>(value: Option<&Value>, what: &str, read: fn(Fields<'_>) -> Option<T>) -> Vec<T> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let entry = read(Fields::of(Some(item)));
                if entry.is_none() {
                    log::warn!("avatar: skipping {what}: {item}");
                }
                entry
            })
            .collect(),
        Some(_) => {
            log::warn!("avatar: {what} list is not an array");
            Vec::new()
        }
    }
}

fn new_part_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
