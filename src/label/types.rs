//! The 14-label classification system.

use serde::{Deserialize, Serialize};

/// Coarse handling tier. Ordered by severity: GREEN < YELLOW < RED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelTier {
    /// Preserve content, polish expression
    Green,
    /// Rewrite with cushion
    Yellow,
    /// Delete silently
    Red,
}

impl std::fmt::Display for LabelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        };
        write!(f, "{}", s)
    }
}

/// Per-segment classification label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentLabel {
    // GREEN (preserve) - message skeleton, must include, style polish only
    CoreFact,
    CoreIntent,
    Request,
    Apology,
    Courtesy,
    // YELLOW (modify) - content preserved, delivery method changed
    Accountability,
    SelfJustification,
    NegativeFeedback,
    Emotional,
    ExcessDetail,
    // RED (remove) - content itself is unnecessary and harmful
    Aggression,
    PersonalAttack,
    PrivateTmi,
    PureGrumble,
}

impl SegmentLabel {
    /// The label's fixed tier.
    pub fn tier(&self) -> LabelTier {
        match self {
            Self::CoreFact | Self::CoreIntent | Self::Request | Self::Apology | Self::Courtesy => {
                LabelTier::Green
            }
            Self::Accountability
            | Self::SelfJustification
            | Self::NegativeFeedback
            | Self::Emotional
            | Self::ExcessDetail => LabelTier::Yellow,
            Self::Aggression | Self::PersonalAttack | Self::PrivateTmi | Self::PureGrumble => {
                LabelTier::Red
            }
        }
    }

    /// Uppercase wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CoreFact => "CORE_FACT",
            Self::CoreIntent => "CORE_INTENT",
            Self::Request => "REQUEST",
            Self::Apology => "APOLOGY",
            Self::Courtesy => "COURTESY",
            Self::Accountability => "ACCOUNTABILITY",
            Self::SelfJustification => "SELF_JUSTIFICATION",
            Self::NegativeFeedback => "NEGATIVE_FEEDBACK",
            Self::Emotional => "EMOTIONAL",
            Self::ExcessDetail => "EXCESS_DETAIL",
            Self::Aggression => "AGGRESSION",
            Self::PersonalAttack => "PERSONAL_ATTACK",
            Self::PrivateTmi => "PRIVATE_TMI",
            Self::PureGrumble => "PURE_GRUMBLE",
        }
    }

    /// Parse a wire name, accepting legacy labels through the migration map.
    pub fn parse(value: &str) -> Option<Self> {
        let direct = match value.trim() {
            "CORE_FACT" => Some(Self::CoreFact),
            "CORE_INTENT" => Some(Self::CoreIntent),
            "REQUEST" => Some(Self::Request),
            "APOLOGY" => Some(Self::Apology),
            "COURTESY" => Some(Self::Courtesy),
            "ACCOUNTABILITY" => Some(Self::Accountability),
            "SELF_JUSTIFICATION" => Some(Self::SelfJustification),
            "NEGATIVE_FEEDBACK" => Some(Self::NegativeFeedback),
            "EMOTIONAL" => Some(Self::Emotional),
            "EXCESS_DETAIL" => Some(Self::ExcessDetail),
            "AGGRESSION" => Some(Self::Aggression),
            "PERSONAL_ATTACK" => Some(Self::PersonalAttack),
            "PRIVATE_TMI" => Some(Self::PrivateTmi),
            "PURE_GRUMBLE" => Some(Self::PureGrumble),
            _ => None,
        };
        direct.or_else(|| Self::migrate_legacy(value.trim()))
    }

    /// Migration map for the transitional period: old labels still emitted by
    /// stale prompts/fixtures map onto the canonical 14.
    pub fn migrate_legacy(value: &str) -> Option<Self> {
        match value {
            "ACCOUNTABILITY_FACT" | "ACCOUNTABILITY_JUDGMENT" => Some(Self::Accountability),
            "SELF_CONTEXT" | "SELF_DEFENSIVE" => Some(Self::SelfJustification),
            "SPECULATION" | "OVER_EXPLANATION" => Some(Self::ExcessDetail),
            _ => None,
        }
    }

    /// All 14 labels.
    pub fn all() -> [SegmentLabel; 14] {
        [
            Self::CoreFact,
            Self::CoreIntent,
            Self::Request,
            Self::Apology,
            Self::Courtesy,
            Self::Accountability,
            Self::SelfJustification,
            Self::NegativeFeedback,
            Self::Emotional,
            Self::ExcessDetail,
            Self::Aggression,
            Self::PersonalAttack,
            Self::PrivateTmi,
            Self::PureGrumble,
        ]
    }
}

impl std::fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A segment with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSegment {
    pub segment_id: String,
    pub label: SegmentLabel,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl LabeledSegment {
    pub fn new(
        segment_id: impl Into<String>,
        label: SegmentLabel,
        text: impl Into<String>,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            segment_id: segment_id.into(),
            label,
            text: text.into(),
            start,
            end,
        }
    }

    pub fn tier(&self) -> LabelTier {
        self.label.tier()
    }
}

/// Tier counts and per-label presence flags over a labeling result.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelStats {
    pub green_count: usize,
    pub yellow_count: usize,
    pub red_count: usize,
    pub has_accountability: bool,
    pub has_negative_feedback: bool,
    pub has_emotional: bool,
    pub has_self_justification: bool,
    pub has_aggression: bool,
}

impl LabelStats {
    pub fn from_segments(segments: &[LabeledSegment]) -> Self {
        let mut stats = LabelStats::default();
        for seg in segments {
            match seg.tier() {
                LabelTier::Green => stats.green_count += 1,
                LabelTier::Yellow => stats.yellow_count += 1,
                LabelTier::Red => stats.red_count += 1,
            }
            match seg.label {
                SegmentLabel::Accountability => stats.has_accountability = true,
                SegmentLabel::NegativeFeedback => stats.has_negative_feedback = true,
                SegmentLabel::Emotional => stats.has_emotional = true,
                SegmentLabel::SelfJustification => stats.has_self_justification = true,
                SegmentLabel::Aggression => stats.has_aggression = true,
                _ => {}
            }
        }
        stats
    }
}
