//! Layer selection and hit testing.
//!
//! Each frame [`compose`] turns a character, the live emotion and the
//! current [`Pose`] into an ordered list of [`Layer`]s:
//!
//! 1. Body: a `body_base` part if one matches, else the full-body image
//!    (current → neutral → happy → sad), drawn below everything.
//! 2. One part per dynamic slot (brow by emotion, eyes by blink, mouth by
//!    level, blush and sweat overlays), scored exact emotion 3, neutral 2,
//!    `all` 1; ties go to the lowest z, then declaration order.
//! 3. Parts with free-form slot names, drawn as-is.
//! 4. Stable sort by z.
//!
//! No layers at all means the stage shows a placeholder.

use super::character::{Canvas, CharacterConfig, HitArea, Part, PartScope, Slot};
use super::emotion::Emotion;
use super::motion::{MouthLevel, Pose, Transform};

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LayerSource {
    /// The full-body image chosen for this emotion.
    FullBody(Emotion),
    Part { part_id: String, slot: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub source: LayerSource,
    pub asset_id: String,
    pub z: i32,
    pub anchor_x: f32,
    pub anchor_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub scale: f32,
    pub rotate_deg: f32,
    pub opacity: f32,
}

impl Layer {
    fn full_body(emotion: Emotion, asset_id: &str) -> Self {
        Self {
            source: LayerSource::FullBody(emotion),
            asset_id: asset_id.to_owned(),
            z: i32::MIN,
            anchor_x: 0.5,
            anchor_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            scale: 1.0,
            rotate_deg: 0.0,
            opacity: 1.0,
        }
    }

    fn from_part(part: &Part) -> Self {
        Self {
            source: LayerSource::Part {
                part_id: part.part_id.clone(),
                slot: part.slot.clone(),
            },
            asset_id: part.asset_id.clone(),
            z: part.z,
            anchor_x: part.anchor_x,
            anchor_y: part.anchor_y,
            offset_x: part.offset_x,
            offset_y: part.offset_y,
            scale: part.scale,
            rotate_deg: part.rotate_deg,
            opacity: part.opacity,
        }
    }

    pub fn is_full_body(&self) -> bool {
        matches!(self.source, LayerSource::FullBody(_))
    }

    /// Where the layer lands on the canvas.  Layer images are authored at
    /// canvas size; the anchor is both the pivot and the attachment point.
    pub fn placement(&self, canvas: Canvas) -> Placement {
        let w = canvas.width as f32;
        let h = canvas.height as f32;
        let pivot = (self.anchor_x * w + self.offset_x, self.anchor_y * h + self.offset_y);
        let size = (w * self.scale, h * self.scale);
        Placement {
            pivot,
            anchor: (self.anchor_x, self.anchor_y),
            min: (pivot.0 - self.anchor_x * size.0, pivot.1 - self.anchor_y * size.1),
            size,
            rotate_deg: self.rotate_deg,
            opacity: self.opacity,
        }
    }
}

/// Canvas-space rectangle plus rotation about `pivot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub pivot: (f32, f32),
    /// Pivot as a fraction of `size`.
    pub anchor: (f32, f32),
    pub min: (f32, f32),
    pub size: (f32, f32),
    pub rotate_deg: f32,
    pub opacity: f32,
}

impl Placement {
    /// Apply the stage-wide transform, which pivots on the canvas's bottom
    /// centre.
    pub fn transformed(self, t: &Transform, canvas: Canvas) -> Placement {
        let origin = (canvas.width as f32 * 0.5, canvas.height as f32);
        let (sin, cos) = t.rotate_deg.to_radians().sin_cos();
        let dx = (self.pivot.0 - origin.0) * t.scale;
        let dy = (self.pivot.1 - origin.1) * t.scale;
        let pivot = (
            origin.0 + dx * cos - dy * sin + t.translate_x,
            origin.1 + dx * sin + dy * cos + t.translate_y,
        );
        let size = (self.size.0 * t.scale, self.size.1 * t.scale);
        Placement {
            pivot,
            anchor: self.anchor,
            min: (pivot.0 - self.anchor.0 * size.0, pivot.1 - self.anchor.1 * size.1),
            size,
            rotate_deg: self.rotate_deg + t.rotate_deg,
            opacity: self.opacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Composition {
    /// Back to front.
    pub layers: Vec<Layer>,
    pub transform: Transform,
}

impl Composition {
    pub fn is_placeholder(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Select and order this frame's layers.
pub fn compose(config: &CharacterConfig, emotion: Emotion, pose: &Pose) -> Composition {
    let mut layers = Vec::new();

    match pick(&config.parts, &[Slot::BodyBase], emotion) {
        Some(body) => layers.push(Layer::from_part(body)),
        None => {
            if let Some((chosen, asset)) = config.full_body_for(emotion) {
                layers.push(Layer::full_body(chosen, asset));
            }
        }
    }

    for candidates in dynamic_slots(emotion, pose) {
        if let Some(part) = pick(&config.parts, &candidates, emotion) {
            layers.push(Layer::from_part(part));
        }
    }

    layers.extend(
        config
            .parts
            .iter()
            .filter(|p| p.enabled && p.slot_kind().is_none())
            .map(Layer::from_part),
    );

    layers.sort_by_key(|layer| (!layer.is_full_body(), layer.z));

    Composition {
        layers,
        transform: pose.transform,
    }
}

/// Candidate lists per dynamic slot, best first.
fn dynamic_slots(emotion: Emotion, pose: &Pose) -> [Vec<Slot>; 5] {
    let brow = match emotion {
        Emotion::Happy => vec![Slot::BrowHappy, Slot::BrowNeutral],
        Emotion::Sad => vec![Slot::BrowSad, Slot::BrowNeutral],
        Emotion::Angry => vec![Slot::BrowAngry, Slot::BrowNeutral],
        _ => vec![Slot::BrowNeutral],
    };
    let eyes = if pose.blink_closed {
        vec![Slot::EyesClosed, Slot::EyesOpen]
    } else {
        vec![Slot::EyesOpen]
    };
    let mouth = match pose.mouth {
        MouthLevel::Open => vec![Slot::MouthOpen, Slot::MouthHalf, Slot::MouthClosed],
        MouthLevel::Half => vec![Slot::MouthHalf, Slot::MouthClosed],
        MouthLevel::Closed => vec![Slot::MouthClosed],
    };
    [brow, eyes, mouth, vec![Slot::FxBlush], vec![Slot::FxSweat]]
}

fn score(scope: PartScope, emotion: Emotion) -> u8 {
    match scope {
        PartScope::Only(e) if e == emotion => 3,
        PartScope::Only(Emotion::Neutral) => 2,
        PartScope::All => 1,
        PartScope::Only(_) => 0,
    }
}

/// Best part for the first candidate slot that has one.
fn pick<'a>(parts: &'a [Part], candidates: &[Slot], emotion: Emotion) -> Option<&'a Part> {
    candidates.iter().find_map(|&slot| {
        let mut best: Option<(&Part, u8)> = None;
        for part in parts.iter().filter(|p| p.enabled && p.slot_kind() == Some(slot)) {
            let s = score(part.emotion, emotion);
            if s == 0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, best_score)) => s > best_score || (s == best_score && part.z < current.z),
            };
            if better {
                best = Some((part, s));
            }
        }
        best.map(|(part, _)| part)
    })
}

// ---------------------------------------------------------------------------
// Hit testing
// ---------------------------------------------------------------------------

/// Map a pointer position inside `rect` (left, top, width, height) to
/// `[0, 1]` stage coordinates; `None` outside or for an empty rect.
pub fn normalize_point(x: f32, y: f32, rect: (f32, f32, f32, f32)) -> Option<(f32, f32)> {
    let (left, top, width, height) = rect;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let nx = (x - left) / width;
    let ny = (y - top) / height;
    ((0.0..=1.0).contains(&nx) && (0.0..=1.0).contains(&ny)).then_some((nx, ny))
}

/// First enabled area containing the normalised point, in declaration order.
pub fn hit_test(config: &CharacterConfig, x: f32, y: f32) -> Option<&HitArea> {
    config
        .hit_areas
        .iter()
        .find(|area| area.enabled && area.contains(x, y))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: &str, slot: Slot, emotion: PartScope, z: i32) -> Part {
        Part {
            part_id: id.into(),
            slot: slot.as_str().into(),
            emotion,
            asset_id: format!("asset-{id}"),
            z,
            anchor_x: 0.5,
            anchor_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            scale: 1.0,
            rotate_deg: 0.0,
            opacity: 1.0,
            enabled: true,
        }
    }

    fn ids(composition: &Composition) -> Vec<String> {
        composition.layers.iter().map(|l| l.asset_id.clone()).collect()
    }

    fn pose_with_mouth(mouth: MouthLevel) -> Pose {
        Pose {
            mouth,
            ..Pose::default()
        }
    }

    #[test]
    fn exact_emotion_beats_wildcard_regardless_of_z() {
        let mut config = CharacterConfig::default();
        config.parts = vec![
            part("all", Slot::MouthClosed, PartScope::All, 1),
            part("happy", Slot::MouthClosed, PartScope::Only(Emotion::Happy), 5),
        ];
        let pose = Pose::default();
        assert_eq!(ids(&compose(&config, Emotion::Happy, &pose)), vec!["asset-happy"]);
        assert_eq!(ids(&compose(&config, Emotion::Neutral, &pose)), vec!["asset-all"]);
    }

    #[test]
    fn neutral_beats_wildcard_and_ties_go_to_lowest_z() {
        let mut config = CharacterConfig::default();
        config.parts = vec![
            part("all", Slot::EyesOpen, PartScope::All, 0),
            part("n9", Slot::EyesOpen, PartScope::Only(Emotion::Neutral), 9),
            part("n2", Slot::EyesOpen, PartScope::Only(Emotion::Neutral), 2),
            part("sad", Slot::EyesOpen, PartScope::Only(Emotion::Sad), 0),
        ];
        assert_eq!(ids(&compose(&config, Emotion::Angry, &Pose::default())), vec!["asset-n2"]);
    }

    #[test]
    fn other_emotions_are_ineligible() {
        let mut config = CharacterConfig::default();
        config.parts = vec![part("sad", Slot::FxSweat, PartScope::Only(Emotion::Sad), 0)];
        assert!(compose(&config, Emotion::Happy, &Pose::default()).is_placeholder());
    }

    #[test]
    fn full_body_fallback_chain() {
        let mut config = CharacterConfig::default();
        let pose = Pose::default();
        assert!(compose(&config, Emotion::Happy, &pose).is_placeholder());

        config.full_map.insert(Emotion::Sad, "sad".into());
        assert_eq!(ids(&compose(&config, Emotion::Happy, &pose)), vec!["sad"]);

        config.full_map.insert(Emotion::Happy, "happy".into());
        assert_eq!(ids(&compose(&config, Emotion::Shy, &pose)), vec!["happy"]);

        config.full_map.insert(Emotion::Neutral, "neutral".into());
        assert_eq!(ids(&compose(&config, Emotion::Shy, &pose)), vec!["neutral"]);
        assert_eq!(ids(&compose(&config, Emotion::Happy, &pose)), vec!["happy"]);

        let layer = &compose(&config, Emotion::Sad, &pose).layers[0];
        assert_eq!(layer.source, LayerSource::FullBody(Emotion::Sad));
    }

    #[test]
    fn body_base_part_replaces_full_body() {
        let mut config = CharacterConfig::default();
        config.full_map.insert(Emotion::Neutral, "full".into());
        config.parts = vec![part("base", Slot::BodyBase, PartScope::Only(Emotion::Angry), 0)];

        assert_eq!(ids(&compose(&config, Emotion::Angry, &Pose::default())), vec!["asset-base"]);
        assert_eq!(ids(&compose(&config, Emotion::Happy, &Pose::default())), vec!["full"]);
    }

    #[test]
    fn eyes_follow_blink_and_fall_back_to_open() {
        let mut config = CharacterConfig::default();
        config.parts = vec![part("open", Slot::EyesOpen, PartScope::All, 0)];
        let closed = Pose {
            blink_closed: true,
            ..Pose::default()
        };
        assert_eq!(ids(&compose(&config, Emotion::Neutral, &closed)), vec!["asset-open"]);

        config.parts.push(part("shut", Slot::EyesClosed, PartScope::All, 0));
        assert_eq!(ids(&compose(&config, Emotion::Neutral, &closed)), vec!["asset-shut"]);
        assert_eq!(ids(&compose(&config, Emotion::Neutral, &Pose::default())), vec!["asset-open"]);
    }

    #[test]
    fn mouth_follows_level_with_fallback() {
        let mut config = CharacterConfig::default();
        config.parts = vec![
            part("closed", Slot::MouthClosed, PartScope::All, 0),
            part("half", Slot::MouthHalf, PartScope::All, 0),
        ];
        let pick_for = |level| ids(&compose(&config, Emotion::Neutral, &pose_with_mouth(level)));
        assert_eq!(pick_for(MouthLevel::Closed), vec!["asset-closed"]);
        assert_eq!(pick_for(MouthLevel::Half), vec!["asset-half"]);
        assert_eq!(pick_for(MouthLevel::Open), vec!["asset-half"]);
    }

    #[test]
    fn brow_by_emotion_with_neutral_fallback() {
        let mut config = CharacterConfig::default();
        config.parts = vec![
            part("bn", Slot::BrowNeutral, PartScope::All, 0),
            part("bh", Slot::BrowHappy, PartScope::All, 0),
        ];
        assert_eq!(ids(&compose(&config, Emotion::Happy, &Pose::default())), vec!["asset-bh"]);
        assert_eq!(ids(&compose(&config, Emotion::Sad, &Pose::default())), vec!["asset-bn"]);
    }

    #[test]
    fn layers_sorted_by_z_with_extras_and_full_body_lowest() {
        let mut config = CharacterConfig::default();
        config.full_map.insert(Emotion::Neutral, "full".into());
        let mut wings = part("wings", Slot::EyesOpen, PartScope::All, -50);
        wings.slot = "wings".into();
        let mut hidden = part("hidden", Slot::FxBlush, PartScope::All, 0);
        hidden.enabled = false;
        config.parts = vec![
            part("mouth", Slot::MouthClosed, PartScope::All, 20),
            part("eyes", Slot::EyesOpen, PartScope::All, 10),
            wings,
            hidden,
            part("sweat", Slot::FxSweat, PartScope::All, 10),
        ];

        let composition = compose(&config, Emotion::Neutral, &Pose::default());
        assert_eq!(
            ids(&composition),
            vec!["full", "asset-wings", "asset-eyes", "asset-sweat", "asset-mouth"]
        );
    }

    #[test]
    fn composition_carries_pose_transform() {
        let config = CharacterConfig::default();
        let pose = Pose {
            transform: Transform {
                translate_y: -3.0,
                ..Transform::default()
            },
            ..Pose::default()
        };
        assert_eq!(compose(&config, Emotion::Neutral, &pose).transform.translate_y, -3.0);
    }

    #[test]
    fn placement_pivots_on_anchor() {
        let canvas = Canvas {
            width: 1000,
            height: 2000,
        };
        let mut layer = Layer::from_part(&part("p", Slot::FxBlush, PartScope::All, 0));
        let placed = layer.placement(canvas);
        assert_eq!(placed.min, (0.0, 0.0));
        assert_eq!(placed.size, (1000.0, 2000.0));

        layer.scale = 0.5;
        layer.offset_x = 10.0;
        let placed = layer.placement(canvas);
        assert_eq!(placed.pivot, (510.0, 2000.0));
        assert_eq!(placed.min, (260.0, 1000.0));
    }

    #[test]
    fn stage_transform_moves_scales_and_rotates_about_bottom_centre() {
        let canvas = Canvas {
            width: 1000,
            height: 1000,
        };
        let placed = Layer::from_part(&part("p", Slot::FxBlush, PartScope::All, 0)).placement(canvas);
        assert_eq!(placed.transformed(&Transform::default(), canvas), placed);

        let shifted = placed.transformed(
            &Transform {
                translate_x: 5.0,
                translate_y: -8.0,
                ..Transform::default()
            },
            canvas,
        );
        assert_eq!(shifted.min, (5.0, -8.0));

        // The default anchor is the bottom centre, so scaling keeps the pivot.
        let grown = placed.transformed(
            &Transform {
                scale: 2.0,
                ..Transform::default()
            },
            canvas,
        );
        assert_eq!(grown.pivot, placed.pivot);
        assert_eq!(grown.size, (2000.0, 2000.0));
        assert_eq!(grown.min, (-500.0, -1000.0));

        let tilted = placed.transformed(
            &Transform {
                rotate_deg: 3.0,
                ..Transform::default()
            },
            canvas,
        );
        assert_eq!(tilted.rotate_deg, 3.0);
        assert!((tilted.pivot.0 - 500.0).abs() < 1e-3 && (tilted.pivot.1 - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn hit_test_takes_first_enabled_match() {
        let mut config = CharacterConfig::default();
        // Stock areas: head, face_left, face_right, chest.
        assert_eq!(hit_test(&config, 0.5, 0.1).map(|a| a.id.as_str()), Some("head"));
        assert_eq!(hit_test(&config, 0.3, 0.3).map(|a| a.reaction_id.as_str()), Some("tap_face"));
        assert!(hit_test(&config, 0.05, 0.95).is_none());

        config.hit_areas[0].enabled = false;
        assert!(hit_test(&config, 0.5, 0.1).is_none());
    }

    #[test]
    fn normalize_point_maps_into_unit_square() {
        let rect = (100.0, 50.0, 200.0, 400.0);
        assert_eq!(normalize_point(200.0, 250.0, rect), Some((0.5, 0.5)));
        assert_eq!(normalize_point(99.0, 250.0, rect), None);
        assert_eq!(normalize_point(0.0, 0.0, (0.0, 0.0, 0.0, 10.0)), None);
    }
}
