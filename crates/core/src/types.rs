//! Shared data model: tiers, segments, insertion plans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PipelineError;

/// A detected silence interval in the base media, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceInterval {
    pub start: f64,
    pub end: f64,
}

/// A non-silent (speech) region of the base media, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
}

impl SpeechSegment {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Personalization tier requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Silver,
    Gold,
    Diamond,
    Platinum,
}

impl FromStr for Tier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silver" => Ok(Tier::Silver),
            "gold" => Ok(Tier::Gold),
            "diamond" => Ok(Tier::Diamond),
            "platinum" => Ok(Tier::Platinum),
            other => Err(PipelineError::Configuration(format!(
                "unknown tier '{}'. Available: silver, gold, diamond, platinum",
                other
            ))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Diamond => "diamond",
            Tier::Platinum => "platinum",
        })
    }
}

/// Where the spoken name lands relative to the base narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamePosition {
    Start,
    End,
}

impl FromStr for NamePosition {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(NamePosition::Start),
            "end" => Ok(NamePosition::End),
            other => Err(PipelineError::Configuration(format!(
                "unknown name position '{}'. Available: start, end",
                other
            ))),
        }
    }
}

impl fmt::Display for NamePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NamePosition::Start => "start",
            NamePosition::End => "end",
        })
    }
}

/// Concrete insertion strategy a tier/position request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Replace the opening speech span in an audio-only render.
    Silver,
    /// Time-stretch the name into the detected opening slot.
    GoldFit,
    /// Truncate trailing silence and append the name.
    AppendEnd,
    /// Splice the name at its natural length, letting the track grow.
    DiamondNatural,
    /// Replace every placeholder utterance with the name.
    PlatinumMarkers,
}

impl InsertPolicy {
    /// File extension of the rendered output.
    pub fn output_extension(&self) -> &'static str {
        match self {
            InsertPolicy::Silver => "mp3",
            _ => "mp4",
        }
    }

    /// Whether the policy renders a video container (and is eligible
    /// for lip sync).
    pub fn is_video(&self) -> bool {
        !matches!(self, InsertPolicy::Silver)
    }
}

impl fmt::Display for InsertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InsertPolicy::Silver => "silver",
            InsertPolicy::GoldFit => "gold-fit",
            InsertPolicy::AppendEnd => "append-end",
            InsertPolicy::DiamondNatural => "diamond-natural",
            InsertPolicy::PlatinumMarkers => "platinum-markers",
        })
    }
}

/// One place the name goes: the base-media span it replaces plus the
/// silence gap inserted after the name (0.0 for none).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsertionPoint {
    pub slot: SpeechSegment,
    pub gap_after: f64,
}

/// Fully resolved plan for one recipient, computed before assembly.
#[derive(Debug, Clone)]
pub struct InsertionPlan {
    pub policy: InsertPolicy,
    /// Cached name clip to splice in (canonical WAV).
    pub clip: PathBuf,
    /// Insertion points in ascending slot order.
    pub points: Vec<InsertionPoint>,
    pub base_duration: f64,
}

/// Per-recipient result recorded in the job manifest.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    pub name: String,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_duration() {
        let seg = SpeechSegment::new(1.2, 3.0);
        assert!((seg.duration() - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_tier_parse_roundtrip() {
        for s in ["silver", "gold", "diamond", "platinum"] {
            let tier: Tier = s.parse().unwrap();
            assert_eq!(tier.to_string(), s);
        }
        assert_eq!("GOLD".parse::<Tier>().unwrap(), Tier::Gold);
        assert!("bronze".parse::<Tier>().is_err());
    }

    #[test]
    fn test_position_parse() {
        assert_eq!("start".parse::<NamePosition>().unwrap(), NamePosition::Start);
        assert_eq!("End".parse::<NamePosition>().unwrap(), NamePosition::End);
        assert!("middle".parse::<NamePosition>().is_err());
    }

    #[test]
    fn test_policy_output_kinds() {
        assert_eq!(InsertPolicy::Silver.output_extension(), "mp3");
        assert!(!InsertPolicy::Silver.is_video());
        for p in [
            InsertPolicy::GoldFit,
            InsertPolicy::AppendEnd,
            InsertPolicy::DiamondNatural,
            InsertPolicy::PlatinumMarkers,
        ] {
            assert_eq!(p.output_extension(), "mp4");
            assert!(p.is_video());
        }
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&Tier::Diamond).unwrap();
        assert_eq!(json, "\"diamond\"");
        let back: Tier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Tier::Diamond);
    }
}
