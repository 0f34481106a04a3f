//! Emotion labels and per-label scores.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Emotion classes produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Happy,
    Neutral,
    Sad,
}

impl EmotionLabel {
    /// All labels, in the classifier's output order.
    pub const ALL: [EmotionLabel; 4] = [
        EmotionLabel::Angry,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Sad,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Sad => "sad",
        }
    }

    /// Map a raw model label onto a known emotion.
    ///
    /// Accepts full labels as well as the short codes emitted by the speech
    /// model (`hap`, `exc`, `fru`, ...). Wrapping brackets and quotes are
    /// stripped. Anything unrecognised collapses to [`EmotionLabel::Neutral`].
    pub fn normalize(raw: &str) -> Self {
        let cleaned = raw
            .trim()
            .trim_matches(|c| matches!(c, '[' | ']' | '\'' | '"'))
            .trim()
            .to_ascii_lowercase();

        match cleaned.as_str() {
            "angry" | "ang" => EmotionLabel::Angry,
            "happy" | "hap" | "exc" | "sur" => EmotionLabel::Happy,
            "sad" | "fru" | "fea" => EmotionLabel::Sad,
            _ => EmotionLabel::Neutral,
        }
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = String;

    /// Strict parse: only the four full labels are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "angry" => Ok(EmotionLabel::Angry),
            "happy" => Ok(EmotionLabel::Happy),
            "neutral" => Ok(EmotionLabel::Neutral),
            "sad" => Ok(EmotionLabel::Sad),
            _ => Err(format!("unknown emotion label: {s}")),
        }
    }
}

/// Probability per emotion label.
///
/// Always holds an entry for every label in [`EmotionLabel::ALL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionScores(BTreeMap<EmotionLabel, f64>);

impl Default for EmotionScores {
    fn default() -> Self {
        Self(EmotionLabel::ALL.iter().map(|l| (*l, 0.0)).collect())
    }
}

impl EmotionScores {
    /// Build scores from a probability vector in [`EmotionLabel::ALL`] order.
    ///
    /// Short vectors are padded with `0.0`; extra entries are ignored.
    pub fn from_probabilities(probabilities: &[f64]) -> Self {
        let mut scores = Self::default();
        for (label, p) in EmotionLabel::ALL.iter().zip(probabilities) {
            scores.0.insert(*label, *p);
        }
        scores
    }

    /// Scores with all mass on one label.
    pub fn certain(label: EmotionLabel) -> Self {
        let mut scores = Self::default();
        scores.0.insert(label, 1.0);
        scores
    }

    pub fn get(&self, label: EmotionLabel) -> f64 {
        self.0.get(&label).copied().unwrap_or(0.0)
    }

    /// Label with the highest score. Ties resolve to the earliest label.
    pub fn dominant(&self) -> EmotionLabel {
        EmotionLabel::ALL
            .iter()
            .copied()
            .fold(EmotionLabel::Angry, |best, label| {
                if self.get(label) > self.get(best) {
                    label
                } else {
                    best
                }
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f64)> + '_ {
        self.0.iter().map(|(l, p)| (*l, *p))
    }
}
