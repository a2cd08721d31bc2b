//! Core pipeline for namecast: personalized name insertion into base
//! audio/video.
//!
//! Given one base recording and a list of recipient names, the pipeline
//! synthesizes each spoken name (with caching and batch synthesis),
//! detects where in the base media the name belongs, and splices it in
//! at one of four tiers ranging from a simple audio-only replacement to
//! multi-marker placeholder substitution. All media work goes through
//! the [`engine::MediaEngine`] trait; the shipped implementation drives
//! ffmpeg/ffprobe subprocesses.

pub mod assemble;
pub mod cache;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod fit;
pub mod names;
pub mod pipeline;
pub mod tier;
pub mod tts;
pub mod types;
