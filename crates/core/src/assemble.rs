//! Per-policy audio assembly.
//!
//! Planning decided where the name lands; assembly cuts the base audio
//! around those spans, splices the loudness-matched name clip in, and
//! renders the deliverable. Silver encodes MP3; every other policy muxes
//! the rebuilt track under the untouched video stream.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{LipSyncConfig, TierConfig};
use crate::engine::ffmpeg::stderr_tail;
use crate::engine::{MediaEngine, MuxMode};
use crate::error::PipelineError;
use crate::fit::{match_loudness, stretch_factor_chain};
use crate::names::ensure_silence_wav;
use crate::types::{InsertPolicy, InsertionPlan, InsertionPoint};

/// Scratch inputs shared by every assembly policy.
pub struct AssembleContext<'a> {
    /// Original base media; its video stream is copied through untouched.
    pub base_video: &'a Path,
    /// Canonical WAV extraction of the base audio track.
    pub base_audio: &'a Path,
    /// Recipient-scoped scratch directory.
    pub work_dir: &'a Path,
}

/// Build the deliverable for one recipient at `output`.
pub fn assemble(
    engine: &dyn MediaEngine,
    plan: &InsertionPlan,
    ctx: &AssembleContext,
    cfg: &TierConfig,
    output: &Path,
) -> Result<()> {
    match plan.policy {
        InsertPolicy::Silver => assemble_silver(engine, plan, ctx, cfg, output),
        InsertPolicy::GoldFit => assemble_gold_fit(engine, plan, ctx, cfg, output),
        InsertPolicy::DiamondNatural => assemble_diamond(engine, plan, ctx, cfg, output),
        InsertPolicy::PlatinumMarkers => assemble_platinum(engine, plan, ctx, cfg, output),
        InsertPolicy::AppendEnd => assemble_append_end(engine, plan, ctx, cfg, output),
    }
}

fn first_point(plan: &InsertionPlan) -> Result<InsertionPoint> {
    plan.points
        .first()
        .copied()
        .ok_or_else(|| anyhow!("insertion plan for {} has no points", plan.policy))
}

/// Loudness-match the name clip against a window of the base audio,
/// returning the clip to splice (matched, or the original when matching
/// is off).
fn match_against_window(
    engine: &dyn MediaEngine,
    clip: &Path,
    window_start: f64,
    window_dur: f64,
    ctx: &AssembleContext,
    cfg: &TierConfig,
) -> Result<PathBuf> {
    if !cfg.match_loudness {
        return Ok(clip.to_path_buf());
    }
    let slot_ref = ctx.work_dir.join("slot_ref.wav");
    engine.extract_clip(ctx.base_audio, &slot_ref, window_start, Some(window_dur))?;
    let matched = ctx.work_dir.join("name_matched.wav");
    match_loudness(engine, clip, &slot_ref, &matched, cfg.max_gain_db)?;
    Ok(matched)
}

/// Silver: name replaces everything up to the end of the opening span,
/// then the rest of the base follows. Audio-only MP3 out.
fn assemble_silver(
    engine: &dyn MediaEngine,
    plan: &InsertionPlan,
    ctx: &AssembleContext,
    cfg: &TierConfig,
    output: &Path,
) -> Result<()> {
    let point = first_point(plan)?;
    let slot = point.slot;
    let name = match_against_window(
        engine,
        &plan.clip,
        slot.start,
        slot.duration().max(0.12),
        ctx,
        cfg,
    )?;

    let suffix = ctx.work_dir.join("base_suffix.wav");
    engine.extract_clip(ctx.base_audio, &suffix, slot.end, None)?;

    let mut pieces = vec![name];
    if point.gap_after > 0.0 {
        pieces.push(ensure_silence_wav(engine, ctx.work_dir, point.gap_after)?);
    }
    pieces.push(suffix);

    let merged = ctx.work_dir.join("merged.wav");
    engine.concat_clips(&pieces, &merged)?;
    engine.encode_mp3(&merged, output, true)
}

/// Gold: time-stretch the name to exactly the slot duration so the
/// surrounding timeline (and the video under it) stays aligned.
fn assemble_gold_fit(
    engine: &dyn MediaEngine,
    plan: &InsertionPlan,
    ctx: &AssembleContext,
    cfg: &TierConfig,
    output: &Path,
) -> Result<()> {
    let slot = first_point(plan)?.slot;
    let target = slot.duration();
    let source_dur = engine.probe_duration(&plan.clip)?;
    let speed = if target > 0.0 { source_dur / target } else { 1.0 };
    log::info!(
        "Fitting name ({:.2} s) into {:.2} s slot (speed {:.2}x)",
        source_dur,
        target,
        speed
    );
    let fitted = ctx.work_dir.join("name_fit.wav");
    engine.fit_to_duration(&plan.clip, &fitted, &stretch_factor_chain(speed), target)?;
    let name = match_against_window(engine, &fitted, slot.start, target, ctx, cfg)?;

    let mut pieces = Vec::new();
    if slot.start > 0.0 {
        let prefix = ctx.work_dir.join("base_prefix.wav");
        engine.extract_clip(ctx.base_audio, &prefix, 0.0, Some(slot.start))?;
        pieces.push(prefix);
    }
    pieces.push(name);
    let suffix = ctx.work_dir.join("base_suffix.wav");
    engine.extract_clip(ctx.base_audio, &suffix, slot.end, None)?;
    pieces.push(suffix);

    let merged = ctx.work_dir.join("merged.wav");
    engine.concat_clips(&pieces, &merged)?;
    engine.mux_audio_into_video(
        ctx.base_video,
        &merged,
        output,
        MuxMode::CopyTrimmed(plan.base_duration),
    )
}

/// Diamond: splice the name at its natural pace, letting the audio run
/// long; the mux loudness-normalizes instead of trimming.
fn assemble_diamond(
    engine: &dyn MediaEngine,
    plan: &InsertionPlan,
    ctx: &AssembleContext,
    cfg: &TierConfig,
    output: &Path,
) -> Result<()> {
    let point = first_point(plan)?;
    let slot = point.slot;
    let name = match_against_window(
        engine,
        &plan.clip,
        slot.start,
        slot.duration().max(0.12),
        ctx,
        cfg,
    )?;

    let mut pieces = Vec::new();
    if slot.start > 0.0 {
        let prefix = ctx.work_dir.join("base_prefix.wav");
        engine.extract_clip(ctx.base_audio, &prefix, 0.0, Some(slot.start))?;
        pieces.push(prefix);
    }
    pieces.push(name);
    if point.gap_after > 0.0 {
        pieces.push(ensure_silence_wav(engine, ctx.work_dir, point.gap_after)?);
    }
    let suffix = ctx.work_dir.join("base_suffix.wav");
    engine.extract_clip(ctx.base_audio, &suffix, slot.end, None)?;
    pieces.push(suffix);

    let merged = ctx.work_dir.join("merged.wav");
    engine.concat_clips(&pieces, &merged)?;
    engine.mux_audio_into_video(ctx.base_video, &merged, output, MuxMode::CopyLoudnorm)
}

/// Platinum: walk the timeline replacing each placeholder marker with
/// the same matched name clip. The first marker sets the loudness
/// reference for all insertions.
fn assemble_platinum(
    engine: &dyn MediaEngine,
    plan: &InsertionPlan,
    ctx: &AssembleContext,
    cfg: &TierConfig,
    output: &Path,
) -> Result<()> {
    let first = first_point(plan)?;
    let name = match_against_window(
        engine,
        &plan.clip,
        first.slot.start,
        first.slot.duration().max(0.12),
        ctx,
        cfg,
    )?;

    let mut pieces = Vec::new();
    let mut cursor = 0.0;
    for (i, point) in plan.points.iter().enumerate() {
        if point.slot.start > cursor {
            let part = ctx.work_dir.join(format!("pre_{}.wav", i));
            engine.extract_clip(
                ctx.base_audio,
                &part,
                cursor,
                Some((point.slot.start - cursor).max(0.01)),
            )?;
            pieces.push(part);
        }
        pieces.push(name.clone());
        if point.gap_after > 0.0 {
            pieces.push(ensure_silence_wav(engine, ctx.work_dir, point.gap_after)?);
        }
        cursor = point.slot.end;
    }
    if plan.base_duration > cursor {
        let tail = ctx.work_dir.join("tail.wav");
        engine.extract_clip(ctx.base_audio, &tail, cursor, None)?;
        pieces.push(tail);
    }

    let merged = ctx.work_dir.join("merged.wav");
    engine.concat_clips(&pieces, &merged)?;
    engine.mux_audio_into_video(ctx.base_video, &merged, output, MuxMode::CopyLoudnorm)
}

/// Append-end: keep the base up to where trailing silence starts and
/// speak the name after it. The kept audio is the loudness reference.
fn assemble_append_end(
    engine: &dyn MediaEngine,
    plan: &InsertionPlan,
    ctx: &AssembleContext,
    cfg: &TierConfig,
    output: &Path,
) -> Result<()> {
    let slot = first_point(plan)?.slot;
    let keep = slot.start;

    let mut pieces = Vec::new();
    if keep > 0.0 {
        let kept = ctx.work_dir.join("base_keep.wav");
        engine.extract_clip(ctx.base_audio, &kept, 0.0, Some(keep))?;
        let name = if cfg.match_loudness {
            let matched = ctx.work_dir.join("name_matched.wav");
            match_loudness(engine, &plan.clip, &kept, &matched, cfg.max_gain_db)?;
            matched
        } else {
            plan.clip.clone()
        };
        pieces.push(kept);
        pieces.push(name);
    } else {
        // Nothing of the base survives; the name alone becomes the track.
        pieces.push(plan.clip.clone());
    }

    let merged = ctx.work_dir.join("merged.wav");
    engine.concat_clips(&pieces, &merged)?;
    engine.mux_audio_into_video(
        ctx.base_video,
        &merged,
        output,
        MuxMode::CopyTrimmed(plan.base_duration),
    )
}

// --- Lip sync ---

fn resolve_tool_path(configured: Option<&Path>, env_key: &str) -> Option<PathBuf> {
    let path = match configured {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(std::env::var_os(env_key)?),
    };
    path.exists().then_some(path)
}

/// Rewrite `video` in place through the configured lip sync provider.
pub fn apply_lip_sync(video: &Path, cfg: &LipSyncConfig) -> Result<()> {
    match cfg.provider.as_str() {
        "none" => return Ok(()),
        "wav2lip" => {}
        "sync_api" => bail!("lip sync provider 'sync_api' is not implemented yet"),
        other => {
            return Err(PipelineError::Configuration(format!(
                "unsupported lip sync provider '{}'. Available: none, wav2lip, sync_api",
                other
            ))
            .into())
        }
    }

    let repo = resolve_tool_path(cfg.repo.as_deref(), "WAV2LIP_REPO").ok_or_else(|| {
        PipelineError::Configuration(
            "Wav2Lip repo not found; set --wav2lip-repo or WAV2LIP_REPO".into(),
        )
    })?;
    let checkpoint =
        resolve_tool_path(cfg.checkpoint.as_deref(), "WAV2LIP_CHECKPOINT").ok_or_else(|| {
            PipelineError::Configuration(
                "Wav2Lip checkpoint not found; set --wav2lip-checkpoint or WAV2LIP_CHECKPOINT"
                    .into(),
            )
        })?;

    let pads: Vec<&str> = cfg.pads.split_whitespace().collect();
    if pads.len() != 4 {
        return Err(PipelineError::Configuration(
            "Wav2Lip pads must contain 4 values, e.g. '0 10 0 0'".into(),
        )
        .into());
    }

    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let synced = video.with_file_name(format!("{}_lipsynced.mp4", stem));

    log::info!("Applying wav2lip to {}", video.display());
    let out = Command::new(&cfg.python)
        .arg(repo.join("inference.py"))
        .arg("--checkpoint_path")
        .arg(&checkpoint)
        .arg("--face")
        .arg(video)
        .arg("--audio")
        .arg(video)
        .arg("--outfile")
        .arg(&synced)
        .arg("--pads")
        .args(&pads)
        .output()
        .with_context(|| format!("failed to spawn {}", cfg.python))?;
    if !out.status.success() {
        return Err(PipelineError::Engine {
            tool: "wav2lip".into(),
            status: out.status.to_string(),
            stderr: stderr_tail(&out.stderr),
        }
        .into());
    }
    std::fs::rename(&synced, video).context("Failed to move lip-synced output into place")?;
    Ok(())
}
