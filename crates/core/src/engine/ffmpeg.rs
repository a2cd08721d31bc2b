//! Subprocess-backed [`MediaEngine`] driving ffmpeg and ffprobe.
//!
//! Argument lists are built by pure functions so the exact command lines
//! stay testable without spawning anything.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::PipelineError;

use super::{MediaEngine, MuxMode};

/// One loudness profile everywhere a final render is normalized.
const LOUDNORM: &str = "loudnorm=I=-18:TP=-1.5:LRA=11";

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;

/// Engine that shells out to `ffmpeg`/`ffprobe` found on PATH.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> Self {
        FfmpegEngine
    }
}

impl MediaEngine for FfmpegEngine {
    fn check_available(&self) -> Result<()> {
        for tool in ["ffmpeg", "ffprobe"] {
            which::which(tool).map_err(|_| {
                PipelineError::Configuration(format!(
                    "{} not found on PATH; install ffmpeg first",
                    tool
                ))
            })?;
        }
        Ok(())
    }

    fn probe_duration(&self, path: &Path) -> Result<f64> {
        let out = run_checked("ffprobe", &probe_duration_args(path))?;
        let text = String::from_utf8_lossy(&out.stdout);
        text.trim()
            .parse::<f64>()
            .with_context(|| format!("could not parse duration of {}", path.display()))
    }

    fn detect_silence(&self, path: &Path, noise_db: f64, min_dur: f64) -> Result<String> {
        let out = run_checked("ffmpeg", &silencedetect_args(path, noise_db, min_dur))?;
        // silencedetect reports on stderr
        Ok(String::from_utf8_lossy(&out.stderr).into_owned())
    }

    fn measure_mean_volume(
        &self,
        path: &Path,
        window: Option<(f64, f64)>,
    ) -> Result<Option<f64>> {
        let out = run_unchecked("ffmpeg", &volumedetect_args(path, window))?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(parse_mean_volume(&String::from_utf8_lossy(&out.stderr)))
    }

    fn to_canonical_wav(&self, input: &Path, out: &Path) -> Result<()> {
        run_checked("ffmpeg", &canonical_wav_args(input, out)).map(|_| ())
    }

    fn extract_clip(
        &self,
        input: &Path,
        out: &Path,
        start: f64,
        duration: Option<f64>,
    ) -> Result<()> {
        run_checked("ffmpeg", &extract_args(input, out, start, duration)).map(|_| ())
    }

    fn concat_clips(&self, inputs: &[PathBuf], out: &Path) -> Result<()> {
        run_checked("ffmpeg", &concat_args(inputs, out)).map(|_| ())
    }

    fn apply_gain(&self, input: &Path, out: &Path, gain_db: f64) -> Result<()> {
        run_checked("ffmpeg", &gain_args(input, out, gain_db)).map(|_| ())
    }

    fn fit_to_duration(
        &self,
        input: &Path,
        out: &Path,
        stages: &[f64],
        duration: f64,
    ) -> Result<()> {
        run_checked("ffmpeg", &fit_args(input, out, stages, duration)).map(|_| ())
    }

    fn make_silence(&self, out: &Path, seconds: f64) -> Result<()> {
        run_checked("ffmpeg", &silence_args(out, seconds)).map(|_| ())
    }

    fn mux_audio_into_video(
        &self,
        video: &Path,
        audio: &Path,
        out: &Path,
        mode: MuxMode,
    ) -> Result<()> {
        run_checked("ffmpeg", &mux_args(video, audio, out, mode)).map(|_| ())
    }

    fn encode_mp3(&self, input: &Path, out: &Path, loudnorm: bool) -> Result<()> {
        run_checked("ffmpeg", &mp3_args(input, out, loudnorm)).map(|_| ())
    }
}

// --- Process plumbing ---

fn run_unchecked(tool: &str, args: &[String]) -> Result<Output> {
    Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to spawn {}", tool))
}

fn run_checked(tool: &str, args: &[String]) -> Result<Output> {
    let out = run_unchecked(tool, args)?;
    if !out.status.success() {
        return Err(PipelineError::Engine {
            tool: tool.into(),
            status: out.status.to_string(),
            stderr: stderr_tail(&out.stderr),
        }
        .into());
    }
    Ok(out)
}

/// ffmpeg puts the useful part of an error at the end of stderr.
pub(crate) fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= 800 {
        text.to_string()
    } else {
        chars[chars.len() - 800..].iter().collect()
    }
}

// --- Argument builders ---

fn p(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn probe_duration_args(path: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "format=duration".into(),
        "-of".into(),
        "default=noprint_wrappers=1:nokey=1".into(),
        p(path),
    ]
}

fn silencedetect_args(path: &Path, noise_db: f64, min_dur: f64) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-i".into(),
        p(path),
        "-af".into(),
        format!("silencedetect=noise={}dB:d={}", noise_db, min_dur),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]
}

fn volumedetect_args(path: &Path, window: Option<(f64, f64)>) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];
    if let Some((start, _)) = window {
        args.push("-ss".into());
        args.push(format!("{:.3}", start));
    }
    args.push("-i".into());
    args.push(p(path));
    if let Some((_, duration)) = window {
        args.push("-t".into());
        args.push(format!("{:.3}", duration));
    }
    args.extend([
        "-vn".into(),
        "-af".into(),
        "volumedetect".into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]);
    args
}

fn canonical_audio_out(out: &Path) -> [String; 7] {
    [
        "-acodec".into(),
        "pcm_s16le".into(),
        "-ar".into(),
        SAMPLE_RATE.to_string(),
        "-ac".into(),
        CHANNELS.to_string(),
        p(out),
    ]
}

fn canonical_wav_args(input: &Path, out: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), p(input), "-vn".into()];
    args.extend(canonical_audio_out(out));
    args
}

fn extract_args(input: &Path, out: &Path, start: f64, duration: Option<f64>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        p(input),
        "-ss".into(),
        format!("{:.3}", start),
    ];
    if let Some(dur) = duration {
        args.push("-t".into());
        args.push(format!("{:.3}", dur));
    }
    args.extend(canonical_audio_out(out));
    args
}

fn concat_args(inputs: &[PathBuf], out: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    for input in inputs {
        args.push("-i".into());
        args.push(p(input));
    }
    let labels: String = (0..inputs.len()).map(|i| format!("[{}:0]", i)).collect();
    args.extend([
        "-filter_complex".into(),
        format!("{}concat=n={}:v=0:a=1[out]", labels, inputs.len()),
        "-map".into(),
        "[out]".into(),
        p(out),
    ]);
    args
}

fn gain_args(input: &Path, out: &Path, gain_db: f64) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        p(input),
        "-af".into(),
        format!("volume={:.3}dB,alimiter=limit=0.95", gain_db),
    ];
    args.extend(canonical_audio_out(out));
    args
}

fn fit_args(input: &Path, out: &Path, stages: &[f64], duration: f64) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        p(input),
        "-af".into(),
        format!("{},apad", atempo_filter(stages)),
        "-t".into(),
        format!("{:.3}", duration),
    ];
    args.extend(canonical_audio_out(out));
    args
}

/// Chain of atempo stages; each stage must already be within 0.5..=2.0.
fn atempo_filter(stages: &[f64]) -> String {
    stages
        .iter()
        .map(|s| format!("atempo={:.6}", s))
        .collect::<Vec<_>>()
        .join(",")
}

fn silence_args(out: &Path, seconds: f64) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        format!("anullsrc=r={}:cl=stereo", SAMPLE_RATE),
        "-t".into(),
        format!("{:.3}", seconds),
        "-acodec".into(),
        "pcm_s16le".into(),
        p(out),
    ]
}

fn mux_args(video: &Path, audio: &Path, out: &Path, mode: MuxMode) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        p(video),
        "-i".into(),
        p(audio),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c:v".into(),
        "copy".into(),
    ];
    match mode {
        MuxMode::CopyTrimmed(duration) => {
            args.push("-t".into());
            args.push(format!("{:.3}", duration));
        }
        MuxMode::CopyLoudnorm => {
            args.push("-af".into());
            args.push(LOUDNORM.into());
        }
    }
    args.push(p(out));
    args
}

fn mp3_args(input: &Path, out: &Path, loudnorm: bool) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), p(input)];
    if loudnorm {
        args.push("-af".into());
        args.push(LOUDNORM.into());
    }
    args.extend([
        "-codec:a".into(),
        "libmp3lame".into(),
        "-q:a".into(),
        "2".into(),
        p(out),
    ]);
    args
}

/// Pull "mean_volume: X dB" out of a volumedetect report.
fn parse_mean_volume(report: &str) -> Option<f64> {
    for line in report.lines() {
        if let Some(idx) = line.find("mean_volume:") {
            let rest = line[idx + "mean_volume:".len()..].trim();
            let value = rest.strip_suffix("dB").unwrap_or(rest).trim();
            if let Ok(v) = value.parse::<f64>() {
                return Some(v);
            }
        }
    }
    None
}
