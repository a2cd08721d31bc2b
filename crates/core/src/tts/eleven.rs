//! ElevenLabs-style cloud TTS with voice cloning.
//!
//! Voice identity is resolved once at construction: an explicit voice id
//! wins, then the cached identity for the configured sample's content
//! hash, and only as a last resort is the sample uploaded for cloning.
//! Freshly cloned ids go back into the store so the upload never repeats.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

use crate::cache::{self, CacheStore};
use crate::config::TtsConfig;
use crate::error::PipelineError;

use super::TtsProvider;

const API_BASE: &str = "https://api.elevenlabs.io";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

#[derive(Debug)]
pub struct ElevenLabsTts {
    api_key: String,
    voice_id: String,
    model_id: String,
    speed: Option<f64>,
}

impl ElevenLabsTts {
    pub fn new(tts: &TtsConfig, store: &mut CacheStore) -> Result<Self> {
        let api_key = match tts.api_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                return Err(PipelineError::Configuration(
                    "elevenlabs provider needs an API key \
                     (--elevenlabs-api-key or ELEVENLABS_API_KEY)"
                        .into(),
                )
                .into())
            }
        };
        let model_id = tts
            .model_id
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let voice_id = resolve_voice_id(tts, &api_key, store)?;
        Ok(Self {
            api_key,
            voice_id,
            model_id,
            speed: tts.speed,
        })
    }
}

impl TtsProvider for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let client = http_client()?;
        let response = client
            .post(format!(
                "{}/v1/text-to-speech/{}",
                API_BASE, self.voice_id
            ))
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&request_payload(text, &self.model_id, self.speed))
            .send()
            .context("TTS request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("elevenlabs TTS failed ({}): {}", status, truncate(&body, 400));
        }
        Ok(response.bytes()?.to_vec())
    }
}

fn resolve_voice_id(tts: &TtsConfig, api_key: &str, store: &mut CacheStore) -> Result<String> {
    if let Some(id) = tts.voice_id.as_deref().filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }
    let sample = match &tts.voice_sample {
        Some(path) => path.as_path(),
        None => {
            return Err(PipelineError::Configuration(
                "elevenlabs provider needs --elevenlabs-voice-id or a --voice-sample to clone"
                    .into(),
            )
            .into())
        }
    };
    let sample_hash = cache::file_hash(sample)?;
    if let Some(id) = store.voice_id_for(&sample_hash) {
        log::info!(
            "Cache hit: voice identity ({}...)",
            &sample_hash[..12.min(sample_hash.len())]
        );
        return Ok(id.to_string());
    }
    let id = clone_voice(api_key, sample, &sample_hash)?;
    store.set_voice_id(&sample_hash, &id)?;
    Ok(id)
}

fn clone_voice(api_key: &str, sample: &Path, sample_hash: &str) -> Result<String> {
    log::info!("Cloning voice from {}", sample.display());
    let client = http_client()?;
    let form = reqwest::blocking::multipart::Form::new()
        .text(
            "name",
            format!("namecast-{}", &sample_hash[..12.min(sample_hash.len())]),
        )
        .file("files", sample)
        .with_context(|| format!("Failed to read voice sample: {}", sample.display()))?;
    let response = client
        .post(format!("{}/v1/voices/add", API_BASE))
        .header("xi-api-key", api_key)
        .multipart(form)
        .send()
        .context("voice clone request failed")?;
    let status = response.status();
    let body = response.text().unwrap_or_default();
    if !status.is_success() {
        bail!("voice clone failed ({}): {}", status, truncate(&body, 400));
    }
    let value: serde_json::Value =
        serde_json::from_str(&body).context("voice clone response was not JSON")?;
    match value.get("voice_id").and_then(|v| v.as_str()) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => bail!(
            "voice clone response had no voice_id: {}",
            truncate(&body, 400)
        ),
    }
}

/// Request body; speaking rate is clamped to the API's accepted range.
fn request_payload(text: &str, model_id: &str, speed: Option<f64>) -> serde_json::Value {
    let mut payload = json!({ "text": text, "model_id": model_id });
    if let Some(speed) = speed {
        payload["voice_settings"] = json!({ "speed": speed.clamp(0.7, 1.2) });
    }
    payload
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(tag: &str) -> CacheStore {
        let dir =
            std::env::temp_dir().join(format!("namecast_eleven_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        CacheStore::open(dir.join("voices.json")).unwrap()
    }

    #[test]
    fn test_payload_without_speed() {
        let payload = request_payload("Asha", "eleven_multilingual_v2", None);
        assert_eq!(payload["text"], "Asha");
        assert_eq!(payload["model_id"], "eleven_multilingual_v2");
        assert!(payload.get("voice_settings").is_none());
    }

    #[test]
    fn test_payload_speed_clamped() {
        let slow = request_payload("x", "m", Some(0.2));
        assert_eq!(slow["voice_settings"]["speed"], 0.7);
        let fast = request_payload("x", "m", Some(3.0));
        assert_eq!(fast["voice_settings"]["speed"], 1.2);
        let fine = request_payload("x", "m", Some(1.05));
        assert_eq!(fine["voice_settings"]["speed"], 1.05);
    }

    #[test]
    fn test_new_requires_api_key() {
        let mut store = open_store("nokey");
        let err = ElevenLabsTts::new(&TtsConfig {
            provider: "elevenlabs".into(),
            ..Default::default()
        }, &mut store)
        .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn test_new_requires_voice_source() {
        let mut store = open_store("novoice");
        let err = ElevenLabsTts::new(
            &TtsConfig {
                provider: "elevenlabs".into(),
                api_key: Some("k".into()),
                ..Default::default()
            },
            &mut store,
        )
        .unwrap_err();
        assert!(err.to_string().contains("voice"));
    }

    #[test]
    fn test_new_with_explicit_voice_id() {
        let mut store = open_store("explicit");
        let provider = ElevenLabsTts::new(
            &TtsConfig {
                provider: "elevenlabs".into(),
                api_key: Some("k".into()),
                voice_id: Some("v-123".into()),
                ..Default::default()
            },
            &mut store,
        )
        .unwrap();
        assert_eq!(provider.name(), "elevenlabs");
        assert_eq!(provider.voice_id, "v-123");
        assert_eq!(provider.model_id, DEFAULT_MODEL);
    }

    #[test]
    fn test_cached_identity_skips_cloning() {
        let dir =
            std::env::temp_dir().join(format!("namecast_eleven_cached_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sample = dir.join("sample.wav");
        std::fs::write(&sample, b"voiceprint").unwrap();

        let mut store = CacheStore::open(dir.join("voices.json")).unwrap();
        let hash = cache::file_hash(&sample).unwrap();
        store.set_voice_id(&hash, "cached-voice").unwrap();

        let provider = ElevenLabsTts::new(
            &TtsConfig {
                provider: "elevenlabs".into(),
                api_key: Some("k".into()),
                voice_sample: Some(sample),
                ..Default::default()
            },
            &mut store,
        )
        .unwrap();
        assert_eq!(provider.voice_id, "cached-voice");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_truncate_char_safe() {
        assert_eq!(truncate("short", 400), "short");
        let long: String = "ठ".repeat(500);
        assert_eq!(truncate(&long, 400).chars().count(), 400);
    }
}
