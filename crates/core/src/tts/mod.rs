//! TTS provider abstraction and selection.

use anyhow::Result;

use crate::cache::CacheStore;
use crate::config::TtsConfig;
use crate::error::PipelineError;

pub mod command;
pub mod eleven;
pub mod translate;

/// A speech synthesizer producing encoded audio bytes (typically MP3).
pub trait TtsProvider: Send + Sync + std::fmt::Debug {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Synthesize `text` and return the encoded audio.
    fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Instantiate the provider selected by `tts.provider`.
///
/// `store` supplies cached voice identities for cloning providers; the
/// ElevenLabs provider may clone a new voice here (one network call)
/// when the configured sample has no cached identity yet.
pub fn get_provider(tts: &TtsConfig, store: &mut CacheStore) -> Result<Box<dyn TtsProvider>> {
    match tts.provider.as_str() {
        "gtts" => Ok(Box::new(translate::TranslateTts::new(tts))),
        "elevenlabs" => Ok(Box::new(eleven::ElevenLabsTts::new(tts, store)?)),
        "command" => Ok(Box::new(command::CommandTts::new(tts)?)),
        "none" => Err(PipelineError::Configuration(
            "TTS provider is 'none'; name audio cannot be synthesized".into(),
        )
        .into()),
        other => Err(PipelineError::Configuration(format!(
            "unknown TTS provider '{}'. Available: gtts, elevenlabs, command, none",
            other
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(tag: &str) -> CacheStore {
        let dir = std::env::temp_dir().join(format!("namecast_tts_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        CacheStore::open(dir.join("voices.json")).unwrap()
    }

    #[test]
    fn test_get_provider_gtts() {
        let mut store = open_store("gtts");
        let provider = get_provider(&TtsConfig::default(), &mut store).unwrap();
        assert_eq!(provider.name(), "gtts");
    }

    #[test]
    fn test_get_provider_none_fails() {
        let mut store = open_store("none");
        let tts = TtsConfig {
            provider: "none".into(),
            ..Default::default()
        };
        let err = get_provider(&tts, &mut store).unwrap_err();
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_get_provider_unknown_lists_choices() {
        let mut store = open_store("unknown");
        let tts = TtsConfig {
            provider: "espeak".into(),
            ..Default::default()
        };
        let err = get_provider(&tts, &mut store).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("espeak"));
        assert!(msg.contains("Available"));
    }
}
