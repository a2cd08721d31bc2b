//! Tunable knobs for detection, tier behavior, TTS, batching, lip sync.
//!
//! Every struct here has a `Default` carrying the values the CLI exposes,
//! so library callers can start from `..Default::default()` and override
//! the handful they care about.

use std::path::PathBuf;

use crate::types::{NamePosition, Tier};

/// Silence/speech boundary detection parameters.
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Noise floor for silencedetect, in dBFS.
    pub silence_db: f64,
    /// Minimum silence length to report, in seconds.
    pub silence_dur: f64,
    /// Leading silence within this distance of t=0 counts as "starts silent".
    pub start_epsilon: f64,
    /// A silence onset must fall this far past speech start to end the segment.
    pub retrigger_guard: f64,
    /// Non-silent spans shorter than this are discarded.
    pub min_segment: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            silence_db: -30.0,
            silence_dur: 0.3,
            start_epsilon: 0.05,
            retrigger_guard: 0.02,
            min_segment: 0.08,
        }
    }
}

/// Tier selection plus the per-tier timing knobs.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub tier: Tier,
    pub position: NamePosition,
    /// Diamond only: splice the name at natural length instead of fitting.
    pub diamond_natural: bool,
    /// Match the name clip's loudness to the surrounding base audio.
    pub match_loudness: bool,
    /// Loudness correction is clamped to +/- this many dB.
    pub max_gain_db: f64,
    /// Silver: seconds of base audio the name replaces when no opening
    /// speech span is detected (or the detected one is too short).
    pub silver_replace_seconds: f64,
    pub silver_gap_seconds: f64,
    pub diamond_gap_seconds: f64,
    /// Gold: hard cap on the fitted name length, in seconds.
    pub gold_max_name_seconds: f64,
    /// Gold: finer silencedetect minimum used when locating the slot.
    pub gold_detect_silence_dur: f64,
    /// Gold: trimmed off the slot end so the name does not bleed into
    /// the following speech.
    pub gold_end_guard_seconds: f64,
    /// Platinum: comma-separated placeholder labels, one per insertion.
    pub platinum_placeholders: String,
    pub platinum_min_silence_dur: f64,
    /// Platinum: speech spans longer than this are narration, not markers.
    pub platinum_max_placeholder_seconds: f64,
    /// Slots shorter than this get widened before use.
    pub min_slot_seconds: f64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tier: Tier::Silver,
            position: NamePosition::Start,
            diamond_natural: false,
            match_loudness: true,
            max_gain_db: 8.0,
            silver_replace_seconds: 0.45,
            silver_gap_seconds: 0.12,
            diamond_gap_seconds: 0.12,
            gold_max_name_seconds: 0.50,
            gold_detect_silence_dur: 0.05,
            gold_end_guard_seconds: 0.08,
            platinum_placeholders: "NAME1,NAME2".into(),
            platinum_min_silence_dur: 0.20,
            platinum_max_placeholder_seconds: 0.90,
            min_slot_seconds: 0.12,
        }
    }
}

/// Which TTS provider to use and how to drive it.
///
/// Every field participates in the name-clip cache key, so changing any
/// of them re-synthesizes rather than serving stale audio.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// One of "gtts", "elevenlabs", "command", "none".
    pub provider: String,
    /// BCP-47-ish language tag passed to the provider.
    pub lang: String,
    /// Spoken text per recipient; `{name}` is substituted.
    pub text_template: String,
    /// Command template for the "command" provider. `{text}`, `{out}` and
    /// `{voice}` are substituted before shell-words splitting.
    pub tts_cmd: String,
    /// Reference speech sample for voice cloning.
    pub voice_sample: Option<PathBuf>,
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
    /// Speaking-rate multiplier where the provider supports one.
    pub speed: Option<f64>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "gtts".into(),
            lang: "hi".into(),
            text_template: "{name}".into(),
            tts_cmd: String::new(),
            voice_sample: None,
            api_key: None,
            voice_id: None,
            model_id: None,
            speed: None,
        }
    }
}

impl TtsConfig {
    /// Render the spoken text for one recipient.
    pub fn render_text(&self, name: &str) -> String {
        self.text_template.replace("{name}", name)
    }
}

/// Batched name synthesis: one TTS request for many names, split apart
/// on the silences between them.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Noise floor for splitting the batch take, in dBFS.
    pub split_db: f64,
    /// Minimum inter-name silence in the batch take, in seconds.
    pub split_dur: f64,
    /// Word spoken between names to force a pause ("..." when empty).
    pub gap_hint: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            split_db: -40.0,
            split_dur: 0.18,
            gap_hint: "ठहराव".into(),
        }
    }
}

/// Optional lip-sync pass over rendered videos.
#[derive(Debug, Clone)]
pub struct LipSyncConfig {
    /// One of "none", "wav2lip", "sync_api".
    pub provider: String,
    pub repo: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    /// Four whitespace-separated crop paddings (top bottom left right).
    pub pads: String,
    pub python: String,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            repo: None,
            checkpoint: None,
            pads: "0 10 0 0".into(),
            python: "python3".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_defaults() {
        let d = DetectConfig::default();
        assert_eq!(d.silence_db, -30.0);
        assert_eq!(d.silence_dur, 0.3);
        assert_eq!(d.min_segment, 0.08);
    }

    #[test]
    fn test_tier_defaults() {
        let t = TierConfig::default();
        assert_eq!(t.tier, Tier::Silver);
        assert_eq!(t.position, NamePosition::Start);
        assert!(t.match_loudness);
        assert_eq!(t.silver_replace_seconds, 0.45);
        assert_eq!(t.gold_max_name_seconds, 0.50);
        assert_eq!(t.platinum_placeholders, "NAME1,NAME2");
    }

    #[test]
    fn test_render_text() {
        let tts = TtsConfig {
            text_template: "Dear {name}, welcome".into(),
            ..Default::default()
        };
        assert_eq!(tts.render_text("Asha"), "Dear Asha, welcome");

        let plain = TtsConfig::default();
        assert_eq!(plain.render_text("Asha"), "Asha");
    }
}
