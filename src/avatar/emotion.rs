//! The fixed emotion vocabulary and alias normalisation.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Emotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Shy,
    Surprised,
}

/// Alias → emotion, checked exactly first and then as a substring, in this
/// order.
const ALIASES: &[(&str, Emotion)] = &[
    ("neutral", Emotion::Neutral),
    ("calm", Emotion::Neutral),
    ("normal", Emotion::Neutral),
    ("平静", Emotion::Neutral),
    ("中性", Emotion::Neutral),
    ("普通", Emotion::Neutral),
    ("happy", Emotion::Happy),
    ("joy", Emotion::Happy),
    ("开心", Emotion::Happy),
    ("高兴", Emotion::Happy),
    ("愉快", Emotion::Happy),
    ("兴奋", Emotion::Happy),
    ("sad", Emotion::Sad),
    ("伤心", Emotion::Sad),
    ("难过", Emotion::Sad),
    ("失落", Emotion::Sad),
    ("沮丧", Emotion::Sad),
    ("angry", Emotion::Angry),
    ("mad", Emotion::Angry),
    ("生气", Emotion::Angry),
    ("愤怒", Emotion::Angry),
    ("恼火", Emotion::Angry),
    ("shy", Emotion::Shy),
    ("害羞", Emotion::Shy),
    ("脸红", Emotion::Shy),
    ("不好意思", Emotion::Shy),
    ("surprised", Emotion::Surprised),
    ("surprise", Emotion::Surprised),
    ("惊讶", Emotion::Surprised),
    ("震惊", Emotion::Surprised),
    ("吃惊", Emotion::Surprised),
];

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Shy,
        Emotion::Surprised,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Shy => "shy",
            Emotion::Surprised => "surprised",
        }
    }

    /// Map free-form text onto the vocabulary, `None` if nothing matches.
    pub fn parse(value: &str) -> Option<Emotion> {
        let key = value.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .or_else(|| ALIASES.iter().find(|(alias, _)| key.contains(alias)))
            .map(|(_, emotion)| *emotion)
    }

    /// Like [`Emotion::parse`], with `default` for unrecognised or blank
    /// text.
    pub fn normalize_or(value: &str, default: Emotion) -> Emotion {
        Self::parse(value).unwrap_or(default)
    }

    pub fn normalize(value: &str) -> Emotion {
        Self::normalize_or(value, Emotion::Neutral)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for emotion in Emotion::ALL {
            assert_eq!(Emotion::normalize(emotion.as_str()), emotion);
        }
    }

    #[test]
    fn aliases_and_substrings() {
        assert_eq!(Emotion::normalize("Joy"), Emotion::Happy);
        assert_eq!(Emotion::normalize("  MAD "), Emotion::Angry);
        assert_eq!(Emotion::normalize("surprise"), Emotion::Surprised);
        assert_eq!(Emotion::normalize("very_happy_now"), Emotion::Happy);
        assert_eq!(Emotion::normalize("开心"), Emotion::Happy);
    }

    #[test]
    fn unknown_falls_back_to_default() {
        assert_eq!(Emotion::normalize("bored"), Emotion::Neutral);
        assert_eq!(Emotion::normalize(""), Emotion::Neutral);
        assert_eq!(Emotion::normalize_or("bored", Emotion::Sad), Emotion::Sad);
        assert_eq!(Emotion::parse("all"), None);
    }
}
