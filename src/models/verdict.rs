//! Classifier verdicts.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Risk label attached to a verdict and to every recorded detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Safe,
    Nudity,
    Violence,
    Bullying,
    Grooming,
    Threat,
    Other,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 7] = [
        RiskCategory::Safe,
        RiskCategory::Nudity,
        RiskCategory::Violence,
        RiskCategory::Bullying,
        RiskCategory::Grooming,
        RiskCategory::Threat,
        RiskCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Safe => "SAFE",
            RiskCategory::Nudity => "NUDITY",
            RiskCategory::Violence => "VIOLENCE",
            RiskCategory::Bullying => "BULLYING",
            RiskCategory::Grooming => "GROOMING",
            RiskCategory::Threat => "THREAT",
            RiskCategory::Other => "OTHER",
        }
    }

    /// Lenient label parsing used on classifier output: case-insensitive,
    /// anything unrecognised becomes `Other`.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(RiskCategory::Other)
    }
}

impl FromStr for RiskCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        RiskCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown risk category '{value}'"))
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured safety judgment for one sample. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_safe: bool,
    pub category: RiskCategory,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f32,
    pub reasoning: String,
}

impl Verdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            category: RiskCategory::Safe,
            confidence: 0.0,
            reasoning: String::new(),
        }
    }

    /// Verdict substituted for a failed or refused classification under a
    /// fail-closed policy.
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            category: RiskCategory::Other,
            confidence: 0.0,
            reasoning: reason.into(),
        }
    }
}
