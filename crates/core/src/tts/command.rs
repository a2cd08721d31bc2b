//! External command TTS: any program that writes audio to a file.
//!
//! The template gets `{text}`, `{out}` and `{voice}` substituted and is
//! then split shell-style, so placeholders carrying spaces should be
//! quoted in the template.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::TtsConfig;
use crate::error::PipelineError;

use super::TtsProvider;

#[derive(Debug)]
pub struct CommandTts {
    template: String,
    voice_sample: Option<PathBuf>,
}

impl CommandTts {
    pub fn new(tts: &TtsConfig) -> Result<Self> {
        if tts.tts_cmd.trim().is_empty() {
            return Err(
                PipelineError::Configuration("command provider needs --tts-cmd".into()).into(),
            );
        }
        Ok(Self {
            template: tts.tts_cmd.clone(),
            voice_sample: tts.voice_sample.clone(),
        })
    }
}

/// Substitute placeholders, then split into argv.
pub fn render_command(
    template: &str,
    text: &str,
    out: &Path,
    voice: Option<&Path>,
) -> Result<Vec<String>> {
    let rendered = template
        .replace("{text}", text)
        .replace("{out}", &out.to_string_lossy())
        .replace(
            "{voice}",
            &voice
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
    let words = shell_words::split(&rendered)
        .with_context(|| format!("Failed to parse TTS command: {}", rendered))?;
    if words.is_empty() {
        bail!("TTS command is empty after substitution");
    }
    Ok(words)
}

impl TtsProvider for CommandTts {
    fn name(&self) -> &str {
        "command"
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir().context("Failed to create scratch dir")?;
        let out = scratch.path().join("tts_out.wav");
        let words = render_command(&self.template, text, &out, self.voice_sample.as_deref())?;
        log::debug!("Running TTS command: {}", words.join(" "));

        let output = Command::new(&words[0])
            .args(&words[1..])
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn {}", words[0]))?;
        if !output.status.success() {
            return Err(PipelineError::Engine {
                tool: words[0].clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        if !out.exists() {
            bail!(
                "TTS command exited cleanly but wrote no {}",
                out.display()
            );
        }
        std::fs::read(&out).with_context(|| format!("Failed to read {}", out.display()))
    }
}
