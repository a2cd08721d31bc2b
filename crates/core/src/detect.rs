//! Silence-report parsing and speech-boundary derivation.
//!
//! The engine hands back raw silencedetect text; everything here turns
//! that into speech segments. Parsing and the interval math are pure so
//! the edge cases stay cheap to test.

use anyhow::Result;
use std::cmp::Ordering;
use std::path::Path;

use crate::config::DetectConfig;
use crate::engine::MediaEngine;
use crate::error::PipelineError;
use crate::types::{SilenceInterval, SpeechSegment};

/// One event from a silencedetect report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceEvent {
    pub kind: SilenceEventKind,
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceEventKind {
    Start,
    End,
}

/// Extract `silence_start` / `silence_end` timestamps from report text.
///
/// `silence_end` lines carry a trailing `| silence_duration: ...` field,
/// which is cut off before parsing. Unparseable lines are skipped.
pub fn parse_silence_events(report: &str) -> Vec<SilenceEvent> {
    let mut events = Vec::new();
    for line in report.lines() {
        if let Some(idx) = line.find("silence_start:") {
            let rest = line[idx + "silence_start:".len()..].trim();
            if let Ok(time) = rest.parse::<f64>() {
                events.push(SilenceEvent {
                    kind: SilenceEventKind::Start,
                    time,
                });
            }
        } else if let Some(idx) = line.find("silence_end:") {
            let rest = &line[idx + "silence_end:".len()..];
            let value = rest.split('|').next().unwrap_or("").trim();
            if let Ok(time) = value.parse::<f64>() {
                events.push(SilenceEvent {
                    kind: SilenceEventKind::End,
                    time,
                });
            }
        }
    }
    events
}

/// Derive the first speech span from silence events.
///
/// Speech starts at 0.0 unless the media opens in silence (a silence
/// onset within `start_epsilon` of t=0), in which case it starts where
/// that silence ends. Speech ends at the first silence onset falling
/// more than `retrigger_guard` past the start; with no such onset the
/// span is undetectable and `None` is returned.
pub fn first_speech_from_events(
    events: &[SilenceEvent],
    cfg: &DetectConfig,
) -> Option<SpeechSegment> {
    if events.is_empty() {
        return None;
    }
    let mut events = events.to_vec();
    events.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));

    let mut speech_start = 0.0;
    let first = &events[0];
    if first.kind == SilenceEventKind::Start && first.time.abs() < cfg.start_epsilon {
        if let Some(end) = events.iter().find(|e| e.kind == SilenceEventKind::End) {
            speech_start = end.time;
        }
    }

    let speech_end = events
        .iter()
        .find(|e| {
            e.kind == SilenceEventKind::Start && e.time > speech_start + cfg.retrigger_guard
        })?
        .time;
    Some(SpeechSegment::new(speech_start, speech_end))
}

/// Where the final stretch of silence begins: the last silence onset in
/// the report, `None` when the media never goes quiet.
pub fn trailing_silence_from_events(events: &[SilenceEvent]) -> Option<f64> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == SilenceEventKind::Start)
        .map(|e| e.time)
}

/// Pair onsets with the following offsets into closed silence intervals.
///
/// An offset with no pending onset is dropped; consecutive onsets keep
/// only the latest. Times are clamped to >= 0.
pub fn silence_intervals(events: &[SilenceEvent]) -> Vec<SilenceInterval> {
    let mut intervals = Vec::new();
    let mut pending: Option<f64> = None;
    for event in events {
        match event.kind {
            SilenceEventKind::Start => pending = Some(event.time),
            SilenceEventKind::End => {
                if let Some(start) = pending.take() {
                    intervals.push(SilenceInterval {
                        start: start.max(0.0),
                        end: event.time.max(0.0),
                    });
                }
            }
        }
    }
    intervals
}

/// Walk the timeline and emit the non-silent spans between intervals,
/// discarding any shorter than `min_segment`.
pub fn complement_segments(
    silences: &[SilenceInterval],
    total_duration: f64,
    min_segment: f64,
) -> Vec<SpeechSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0.0;
    for silence in silences {
        if silence.start > cursor && (silence.start - cursor) >= min_segment {
            segments.push(SpeechSegment::new(cursor, silence.start));
        }
        cursor = cursor.max(silence.end);
    }
    if total_duration > cursor && (total_duration - cursor) >= min_segment {
        segments.push(SpeechSegment::new(cursor, total_duration));
    }
    segments
}

// --- Engine-backed entry points ---

fn run_silencedetect(
    engine: &dyn MediaEngine,
    path: &Path,
    noise_db: f64,
    min_dur: f64,
) -> Result<String> {
    match engine.detect_silence(path, noise_db, min_dur) {
        Ok(report) => Ok(report),
        Err(e) => Err(PipelineError::Detection(format!(
            "silence scan failed for {}: {:#}",
            path.display(),
            e
        ))
        .into()),
    }
}

/// First speech span of `path`, or `None` when undetectable.
pub fn first_speech_segment(
    engine: &dyn MediaEngine,
    path: &Path,
    noise_db: f64,
    min_silence: f64,
    cfg: &DetectConfig,
) -> Result<Option<SpeechSegment>> {
    let report = run_silencedetect(engine, path, noise_db, min_silence)?;
    Ok(first_speech_from_events(&parse_silence_events(&report), cfg))
}

/// Start of the trailing silence of `path`, or `None`.
pub fn trailing_silence_start(
    engine: &dyn MediaEngine,
    path: &Path,
    noise_db: f64,
    min_silence: f64,
) -> Result<Option<f64>> {
    let report = run_silencedetect(engine, path, noise_db, min_silence)?;
    Ok(trailing_silence_from_events(&parse_silence_events(&report)))
}

/// All non-silent spans of `path`, ascending.
pub fn non_silent_segments(
    engine: &dyn MediaEngine,
    path: &Path,
    noise_db: f64,
    min_silence: f64,
    min_segment: f64,
) -> Result<Vec<SpeechSegment>> {
    let report = run_silencedetect(engine, path, noise_db, min_silence)?;
    let intervals = silence_intervals(&parse_silence_events(&report));
    let total = match engine.probe_duration(path) {
        Ok(d) => d,
        Err(e) => {
            return Err(PipelineError::Detection(format!(
                "could not probe duration of {}: {:#}",
                path.display(),
                e
            ))
            .into())
        }
    };
    Ok(complement_segments(&intervals, total, min_segment))
}
