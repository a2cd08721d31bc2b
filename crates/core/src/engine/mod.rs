//! Media engine abstraction.
//!
//! The pipeline talks to ffmpeg/ffprobe only through [`MediaEngine`], so
//! every stage above this line can be exercised with a scripted engine.

use anyhow::Result;
use std::path::{Path, PathBuf};

pub mod fake;
pub mod ffmpeg;

pub use ffmpeg::FfmpegEngine;

/// How assembled audio is muxed back under the base video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MuxMode {
    /// Copy the video stream and trim the output to a fixed duration.
    CopyTrimmed(f64),
    /// Copy the video stream and loudness-normalize the audio, letting
    /// the container grow with the audio track.
    CopyLoudnorm,
}

/// Everything the pipeline needs from the underlying media toolbox.
///
/// Audio outputs are canonical WAV (48 kHz stereo s16le) unless a method
/// says otherwise.
pub trait MediaEngine: Send + Sync {
    /// Verify the backing tools exist before starting a job.
    fn check_available(&self) -> Result<()>;

    /// Container duration in seconds.
    fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Run silence detection and return the raw report text.
    fn detect_silence(&self, path: &Path, noise_db: f64, min_dur: f64) -> Result<String>;

    /// Mean volume in dBFS, `None` when measurement fails. `window`
    /// restricts measurement to `(start, duration)` seconds.
    fn measure_mean_volume(&self, path: &Path, window: Option<(f64, f64)>)
        -> Result<Option<f64>>;

    /// Decode any input's audio to canonical WAV.
    fn to_canonical_wav(&self, input: &Path, out: &Path) -> Result<()>;

    /// Cut `[start, start+duration)` as canonical WAV; `None` runs to the
    /// end of the input.
    fn extract_clip(&self, input: &Path, out: &Path, start: f64, duration: Option<f64>)
        -> Result<()>;

    /// Concatenate audio clips into one canonical WAV.
    fn concat_clips(&self, inputs: &[PathBuf], out: &Path) -> Result<()>;

    /// Apply a dB gain with a limiter guarding against clipping.
    fn apply_gain(&self, input: &Path, out: &Path, gain_db: f64) -> Result<()>;

    /// Time-stretch through `stages` (each within atempo's 0.5..=2.0
    /// range) and pad or trim to exactly `duration` seconds.
    fn fit_to_duration(&self, input: &Path, out: &Path, stages: &[f64], duration: f64)
        -> Result<()>;

    /// Generate `seconds` of canonical silence.
    fn make_silence(&self, out: &Path, seconds: f64) -> Result<()>;

    /// Replace the audio track of `video` with `audio`.
    fn mux_audio_into_video(&self, video: &Path, audio: &Path, out: &Path, mode: MuxMode)
        -> Result<()>;

    /// Encode to MP3, optionally loudness-normalizing on the way.
    fn encode_mp3(&self, input: &Path, out: &Path, loudnorm: bool) -> Result<()>;
}
