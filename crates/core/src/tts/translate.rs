//! Free translate-endpoint TTS (the "gtts" provider).
//!
//! Each text chunk goes out as a GET and the MP3 bodies are concatenated;
//! MPEG frames are self-delimiting, so the joined stream decodes fine.
//! The endpoint caps query length, hence the chunking.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::TtsConfig;

use super::TtsProvider;

const ENDPOINT: &str = "https://translate.google.com/translate_tts";
/// The endpoint rejects very long queries; stay comfortably under.
const MAX_CHUNK_CHARS: usize = 200;
/// The endpoint refuses requests without a browser-ish agent.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";

#[derive(Debug)]
pub struct TranslateTts {
    lang: String,
}

impl TranslateTts {
    pub fn new(tts: &TtsConfig) -> Self {
        Self {
            lang: tts.lang.clone(),
        }
    }
}

impl TtsProvider for TranslateTts {
    fn name(&self) -> &str {
        "gtts"
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            bail!("nothing to synthesize");
        }
        let mut audio = Vec::new();
        for chunk in &chunks {
            let response = client
                .get(ENDPOINT)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", self.lang.as_str()),
                    ("q", chunk.as_str()),
                ])
                .send()
                .context("translate TTS request failed")?;
            let status = response.status();
            if !status.is_success() {
                bail!(
                    "translate TTS returned {} for a {}-char chunk",
                    status,
                    chunk.chars().count()
                );
            }
            audio.extend_from_slice(&response.bytes()?);
        }
        Ok(audio)
    }
}

/// Split text into chunks of at most `max_chars`, breaking at line
/// boundaries first and at word boundaries inside oversized lines.
/// Words longer than `max_chars` are kept whole rather than split.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.chars().count() <= max_chars {
            append_unit(&mut chunks, &mut current, &mut current_chars, line, max_chars);
        } else {
            for word in line.split_whitespace() {
                append_unit(&mut chunks, &mut current, &mut current_chars, word, max_chars);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn append_unit(
    chunks: &mut Vec<String>,
    current: &mut String,
    current_chars: &mut usize,
    unit: &str,
    max_chars: usize,
) {
    let unit_chars = unit.chars().count();
    if *current_chars > 0 && *current_chars + 1 + unit_chars > max_chars {
        chunks.push(std::mem::take(current));
        *current_chars = 0;
    }
    if *current_chars > 0 {
        current.push(' ');
        *current_chars += 1;
    }
    current.push_str(unit);
    *current_chars += unit_chars;
}
