//! Tier policy resolution and insertion planning.
//!
//! A tier/position request first resolves to a concrete [`InsertPolicy`],
//! then planning runs whatever detection that policy needs and pins down
//! the exact spans the name will replace. Slot arithmetic is kept in
//! pure helpers; only `plan_insertion` touches the engine.

use anyhow::Result;
use std::path::Path;

use crate::config::{DetectConfig, TierConfig};
use crate::detect;
use crate::engine::MediaEngine;
use crate::error::PipelineError;
use crate::types::{
    InsertPolicy, InsertionPlan, InsertionPoint, NamePosition, SpeechSegment, Tier,
};

/// How far a too-short opening span is widened for natural splicing.
const DIAMOND_WIDEN_SECONDS: f64 = 0.35;

/// Map a tier/position request onto the policy that implements it.
///
/// Silver renders audio only, so position is ignored (End becomes Start).
/// Diamond at the start without natural-length splicing collapses to the
/// gold fit, and Diamond/Platinum have no end-position variant at all.
pub fn resolve_policy(
    tier: Tier,
    position: NamePosition,
    diamond_natural: bool,
) -> Result<InsertPolicy> {
    let position = if tier == Tier::Silver && position == NamePosition::End {
        log::info!("Silver renders audio only; treating name position 'end' as 'start'");
        NamePosition::Start
    } else {
        position
    };
    match (tier, position) {
        (Tier::Silver, _) => Ok(InsertPolicy::Silver),
        (Tier::Gold, NamePosition::Start) => Ok(InsertPolicy::GoldFit),
        (Tier::Gold, NamePosition::End) => Ok(InsertPolicy::AppendEnd),
        (Tier::Diamond, NamePosition::Start) => {
            if diamond_natural {
                Ok(InsertPolicy::DiamondNatural)
            } else {
                log::warn!("Diamond without natural-length splicing falls back to the gold fit");
                Ok(InsertPolicy::GoldFit)
            }
        }
        (Tier::Platinum, NamePosition::Start) => Ok(InsertPolicy::PlatinumMarkers),
        (tier, NamePosition::End) => Err(PipelineError::Configuration(format!(
            "tier '{}' does not support name position 'end'",
            tier
        ))
        .into()),
    }
}

/// Parse comma-separated placeholder labels; blank entries are dropped
/// and an all-blank list still means one insertion.
pub fn parse_placeholders(spec: &str) -> Vec<String> {
    let labels: Vec<String> = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        vec!["NAME1".to_string()]
    } else {
        labels
    }
}

// --- Slot arithmetic ---

/// Silver: the opening span as detected, a fixed fallback when detection
/// comes up empty, or a widening when the span is too short to land in.
fn silver_slot(seg: Option<SpeechSegment>, base_duration: f64, cfg: &TierConfig) -> SpeechSegment {
    match seg {
        None => SpeechSegment::new(0.0, base_duration.min(cfg.silver_replace_seconds.max(0.2))),
        Some(seg) if seg.duration() < cfg.min_slot_seconds => SpeechSegment::new(
            seg.start,
            base_duration.min(seg.start + cfg.silver_replace_seconds),
        ),
        Some(seg) => seg,
    }
}

/// Gold: cap the span, trim the end guard, refuse degenerate leftovers.
fn gold_slot(seg: SpeechSegment, cfg: &TierConfig) -> Result<SpeechSegment> {
    let capped = seg.duration().min(cfg.gold_max_name_seconds);
    let trimmed = capped - cfg.gold_end_guard_seconds.max(0.0);
    if trimmed <= 0.05 {
        return Err(PipelineError::Fit(format!(
            "name slot degenerates to {:.3} s after the end guard",
            trimmed
        ))
        .into());
    }
    let slot = trimmed.max(cfg.min_slot_seconds);
    Ok(SpeechSegment::new(seg.start, seg.start + slot))
}

/// Diamond natural: widen too-short spans to a comfortable landing.
fn diamond_slot(seg: SpeechSegment, base_duration: f64, cfg: &TierConfig) -> SpeechSegment {
    if seg.duration() < cfg.min_slot_seconds {
        SpeechSegment::new(
            seg.start,
            base_duration.min(seg.start + DIAMOND_WIDEN_SECONDS),
        )
    } else {
        seg
    }
}

/// Platinum: placeholder utterances are the speech spans short enough to
/// be a spoken label rather than narration, taken in timeline order.
fn platinum_markers(
    segments: &[SpeechSegment],
    placeholder_count: usize,
    max_len: f64,
) -> Result<Vec<SpeechSegment>> {
    let markers: Vec<SpeechSegment> = segments
        .iter()
        .copied()
        .filter(|s| s.duration() <= max_len)
        .collect();
    if markers.len() < placeholder_count {
        return Err(PipelineError::Detection(format!(
            "found {} placeholder utterances, need {}",
            markers.len(),
            placeholder_count
        ))
        .into());
    }
    Ok(markers.into_iter().take(placeholder_count).collect())
}

// --- Planning ---

/// Inputs the planner needs about one recipient's media.
pub struct PlanContext<'a> {
    /// Original base media (scanned for opening/trailing spans).
    pub base_video: &'a Path,
    /// Canonical audio extraction of the base (scanned for markers).
    pub base_audio: &'a Path,
    pub base_duration: f64,
    /// Cached name clip and its length.
    pub name_clip: &'a Path,
    pub name_duration: f64,
}

fn require_opening_span(
    engine: &dyn MediaEngine,
    path: &Path,
    cfg: &TierConfig,
    detect_cfg: &DetectConfig,
) -> Result<SpeechSegment> {
    let min_silence = detect_cfg.silence_dur.min(cfg.gold_detect_silence_dur);
    match detect::first_speech_segment(engine, path, detect_cfg.silence_db, min_silence, detect_cfg)?
    {
        Some(seg) => Ok(seg),
        None => Err(PipelineError::Detection(
            "no opening speech span detected; the name has nowhere to land".into(),
        )
        .into()),
    }
}

/// Resolve where the name lands, running whatever detection `policy`
/// needs over the base media.
pub fn plan_insertion(
    engine: &dyn MediaEngine,
    policy: InsertPolicy,
    ctx: &PlanContext,
    cfg: &TierConfig,
    detect_cfg: &DetectConfig,
) -> Result<InsertionPlan> {
    let points = match policy {
        InsertPolicy::Silver => {
            let min_silence = detect_cfg.silence_dur.min(cfg.gold_detect_silence_dur);
            let seg = detect::first_speech_segment(
                engine,
                ctx.base_video,
                detect_cfg.silence_db,
                min_silence,
                detect_cfg,
            )?;
            if seg.is_none() {
                log::info!(
                    "No opening speech span found; replacing the first {:.2} s",
                    cfg.silver_replace_seconds
                );
            }
            vec![InsertionPoint {
                slot: silver_slot(seg, ctx.base_duration, cfg),
                gap_after: cfg.silver_gap_seconds,
            }]
        }
        InsertPolicy::GoldFit => {
            let seg = require_opening_span(engine, ctx.base_video, cfg, detect_cfg)?;
            vec![InsertionPoint {
                slot: gold_slot(seg, cfg)?,
                gap_after: 0.0,
            }]
        }
        InsertPolicy::DiamondNatural => {
            let seg = require_opening_span(engine, ctx.base_video, cfg, detect_cfg)?;
            vec![InsertionPoint {
                slot: diamond_slot(seg, ctx.base_duration, cfg),
                gap_after: cfg.diamond_gap_seconds,
            }]
        }
        InsertPolicy::PlatinumMarkers => {
            let placeholders = parse_placeholders(&cfg.platinum_placeholders);
            let segments = detect::non_silent_segments(
                engine,
                ctx.base_audio,
                detect_cfg.silence_db,
                cfg.platinum_min_silence_dur,
                detect_cfg.min_segment,
            )?;
            let markers = platinum_markers(
                &segments,
                placeholders.len(),
                cfg.platinum_max_placeholder_seconds,
            )?;
            log::info!("Using {} placeholder markers", markers.len());
            markers
                .into_iter()
                .map(|slot| InsertionPoint {
                    slot,
                    gap_after: cfg.diamond_gap_seconds,
                })
                .collect()
        }
        InsertPolicy::AppendEnd => {
            let trailing = detect::trailing_silence_start(
                engine,
                ctx.base_video,
                detect_cfg.silence_db,
                detect_cfg.silence_dur,
            )?;
            let keep = match trailing {
                Some(t) => t.clamp(0.0, ctx.base_duration),
                None => (ctx.base_duration - ctx.name_duration).max(0.0),
            };
            vec![InsertionPoint {
                slot: SpeechSegment::new(keep, ctx.base_duration),
                gap_after: 0.0,
            }]
        }
    };
    Ok(InsertionPlan {
        policy,
        clip: ctx.name_clip.to_path_buf(),
        points,
        base_duration: ctx.base_duration,
    })
}
