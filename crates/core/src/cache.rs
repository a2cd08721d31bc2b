//! Content-addressed caching of synthesized name clips and cloned voice
//! identities.
//!
//! A cached clip is addressed by the recipient name plus a key covering
//! every knob that changes what the TTS provider would say, so stale
//! audio is never served. Installs are atomic (sibling temp file, then
//! rename) to keep concurrent jobs off each other's toes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::config::TtsConfig;

/// Get the cache directory.
///
/// Uses `NAMECAST_CACHE_DIR` env var if set, otherwise `~/.cache/namecast`.
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NAMECAST_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cache").join("namecast")
}

/// Compute SHA-256 hash of a file's contents.
///
/// Returns a 64-character hex string.
pub fn file_hash(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    std::io::copy(&mut file, &mut hasher)?;
    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}

/// First 12 hex chars of the SHA-1 of a string.
///
/// The algorithm is part of the clip filename contract; pre-existing
/// cache directories must keep hitting. Content hashing elsewhere is
/// SHA-256.
pub fn hash12(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..12].to_string()
}

/// Filesystem-safe rendition of a recipient name: runs of characters
/// outside `[A-Za-z0-9_-]` collapse to `_`, trimmed, never empty.
pub fn safe_slug(name: &str) -> String {
    let mut slug = String::new();
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            slug.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "person".to_string()
    } else {
        slug.to_string()
    }
}

/// Cache key covering every synthesis-affecting TTS setting. Includes a
/// content hash of the voice sample when one is configured.
pub fn name_cache_key(tts: &TtsConfig) -> Result<String> {
    let sample_hash = match &tts.voice_sample {
        Some(path) => file_hash(path)
            .with_context(|| format!("Failed to hash voice sample: {}", path.display()))?,
        None => String::new(),
    };
    let speed = tts.speed.map(|s| format!("{:.3}", s)).unwrap_or_default();
    Ok([
        tts.provider.as_str(),
        tts.lang.as_str(),
        tts.text_template.as_str(),
        tts.tts_cmd.as_str(),
        tts.voice_id.as_deref().unwrap_or(""),
        tts.model_id.as_deref().unwrap_or(""),
        speed.as_str(),
        sample_hash.as_str(),
    ]
    .join("|"))
}

// --- Name clip cache ---

/// On-disk store of synthesized name clips.
pub struct NameCache {
    dir: PathBuf,
    key: String,
}

impl NameCache {
    pub fn new(dir: PathBuf, key: String) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create name cache dir: {}", dir.display()))?;
        Ok(Self { dir, key })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<slug>_<hash12>.wav`, where the hash covers the trimmed name
    /// and the full cache key.
    pub fn clip_path(&self, name: &str) -> PathBuf {
        let digest = hash12(&format!("{}|{}", name.trim(), self.key));
        self.dir.join(format!("{}_{}.wav", safe_slug(name), digest))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clip_path(name).exists()
    }

    /// Move a finished clip into place atomically.
    pub fn install(&self, name: &str, src: &Path) -> Result<PathBuf> {
        let target = self.clip_path(name);
        let tmp = target.with_extension("wav.tmp");
        fs::copy(src, &tmp)
            .with_context(|| format!("Failed to stage {} into cache", src.display()))?;
        fs::rename(&tmp, &target)
            .with_context(|| format!("Failed to install {}", target.display()))?;
        Ok(target)
    }
}

// --- Voice identity store ---

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    voices: HashMap<String, String>,
}

/// Small JSON store mapping voice-sample hashes to provider voice ids,
/// so a sample is cloned once and the identity reused across jobs.
pub struct CacheStore {
    path: PathBuf,
    data: StoreData,
}

impl CacheStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!(
                        "Voice store {} unreadable ({}); starting fresh",
                        path.display(),
                        e
                    );
                    StoreData::default()
                }
            },
            Err(_) => StoreData::default(),
        };
        Ok(Self { path, data })
    }

    pub fn voice_id_for(&self, sample_hash: &str) -> Option<&str> {
        self.data.voices.get(sample_hash).map(String::as_str)
    }

    pub fn set_voice_id(&mut self, sample_hash: &str, voice_id: &str) -> Result<()> {
        self.data
            .voices
            .insert(sample_hash.to_string(), voice_id.to_string());
        self.flush()
    }

    /// Atomically write the store out via temp file + rename.
    pub fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .with_context(|| format!("Failed to write voice store: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Wipe a cache directory and recreate it empty. Returns the number of
/// files and directories removed.
pub fn clear_cache(dir: &Path) -> Result<(usize, usize)> {
    let mut files = 0usize;
    let mut dirs = 0usize;
    if dir.exists() {
        count_entries(dir, &mut files, &mut dirs)?;
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove cache dir: {}", dir.display()))?;
    }
    fs::create_dir_all(dir)?;
    Ok((files, dirs))
}

fn count_entries(dir: &Path, files: &mut usize, dirs: &mut usize) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            *dirs += 1;
            count_entries(&path, files, dirs)?;
        } else {
            *files += 1;
        }
    }
    Ok(())
}
