//! Name clip provisioning: synthesis, caching, batch splitting.
//!
//! A "name clip" is a short canonical WAV of one recipient's spoken name.
//! When many recipients are missing from the cache, all of them are read
//! in a single TTS take and the take is split apart on the silences
//! between names, which is far cheaper against metered providers.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::NameCache;
use crate::config::{BatchConfig, DetectConfig, TtsConfig};
use crate::detect;
use crate::engine::MediaEngine;
use crate::error::PipelineError;
use crate::tts::TtsProvider;

/// Return the cached canonical clip for `name`, synthesizing it first on
/// a cache miss.
pub fn ensure_name_clip(
    engine: &dyn MediaEngine,
    provider: &dyn TtsProvider,
    cache: &NameCache,
    tts: &TtsConfig,
    name: &str,
) -> Result<PathBuf> {
    let target = cache.clip_path(name);
    if target.exists() {
        log::info!("Cache hit: name clip for '{}'", name);
        return Ok(target);
    }

    log::info!("Synthesizing '{}' via {}", name, provider.name());
    let audio = provider
        .synthesize(&tts.render_text(name))
        .with_context(|| format!("TTS failed for '{}'", name))?;

    let scratch = tempfile::tempdir().context("Failed to create scratch dir")?;
    let raw = scratch.path().join("tts.mp3");
    fs::write(&raw, &audio)?;
    let wav = scratch.path().join("tts.wav");
    engine.to_canonical_wav(&raw, &wav)?;
    cache.install(name, &wav)
}

/// Thresholds tried when splitting a batch take: the configured pair,
/// then two progressively looser rungs.
fn split_ladder(cfg: &BatchConfig) -> [(f64, f64); 3] {
    [
        (cfg.split_db, cfg.split_dur),
        (cfg.split_db + 5.0, (cfg.split_dur * 0.66).max(0.08)),
        (cfg.split_db + 10.0, (cfg.split_dur * 0.5).max(0.05)),
    ]
}

/// Spoken text for a batch take: one name per line, a period plus the
/// gap hint after each so the voice actually pauses between names.
fn batch_text(texts: &[String], gap_hint: &str) -> String {
    let hint = gap_hint.trim();
    let sep = if hint.is_empty() { "..." } else { hint };
    format!("{}.", texts.join(&format!(". {}\n", sep)))
}

/// Synthesize all uncached names in one take and split it apart on the
/// silences between them, assigning segments to names strictly in order.
///
/// Returns the full name -> clip map (cached and fresh). When the take
/// keeps splitting short even at the loosest thresholds, fails with
/// [`PipelineError::BatchSplit`] and caches nothing from the take.
pub fn ensure_name_clips_batch(
    engine: &dyn MediaEngine,
    provider: &dyn TtsProvider,
    cache: &NameCache,
    tts: &TtsConfig,
    batch: &BatchConfig,
    detect_cfg: &DetectConfig,
    names: &[String],
) -> Result<HashMap<String, PathBuf>> {
    let mut clips = HashMap::new();
    let mut missing: Vec<String> = Vec::new();
    for name in names {
        if cache.contains(name) {
            log::info!("Cache hit: name clip for '{}'", name);
            clips.insert(name.clone(), cache.clip_path(name));
        } else {
            missing.push(name.clone());
        }
    }
    if missing.is_empty() {
        return Ok(clips);
    }

    let texts: Vec<String> = missing.iter().map(|n| tts.render_text(n)).collect();
    log::info!(
        "Batch synthesizing {} names via {}",
        missing.len(),
        provider.name()
    );
    let audio = provider
        .synthesize(&batch_text(&texts, &batch.gap_hint))
        .context("batch TTS failed")?;

    let scratch = tempfile::tempdir().context("Failed to create scratch dir")?;
    let raw = scratch.path().join("batch.mp3");
    fs::write(&raw, &audio)?;
    let wav = scratch.path().join("batch.wav");
    engine.to_canonical_wav(&raw, &wav)?;

    // --- Split the take apart ---
    let mut segments = Vec::new();
    for (noise_db, min_dur) in split_ladder(batch) {
        segments =
            detect::non_silent_segments(engine, &wav, noise_db, min_dur, detect_cfg.min_segment)?;
        if segments.len() >= missing.len() {
            break;
        }
        log::debug!(
            "Batch split found {} of {} segments at {} dB / {} s",
            segments.len(),
            missing.len(),
            noise_db,
            min_dur
        );
    }
    if segments.len() < missing.len() {
        return Err(PipelineError::BatchSplit {
            found: segments.len(),
            needed: missing.len(),
        }
        .into());
    }

    // --- Extract and install, first segment to first name ---
    for (i, name) in missing.iter().enumerate() {
        let seg = segments[i];
        let clip = scratch.path().join(format!("name_{}.wav", i));
        engine.extract_clip(&wav, &clip, seg.start, Some(seg.duration().max(0.05)))?;
        let installed = cache.install(name, &clip)?;
        clips.insert(name.clone(), installed);
    }
    Ok(clips)
}

/// Cached silence clip of `seconds`, generated once per length.
pub fn ensure_silence_wav(engine: &dyn MediaEngine, dir: &Path, seconds: f64) -> Result<PathBuf> {
    let millis = (seconds * 1000.0).round() as i64;
    let path = dir.join(format!("_silence_{}ms.wav", millis));
    if path.exists() {
        return Ok(path);
    }
    fs::create_dir_all(dir)?;
    engine.make_silence(&path, seconds)?;
    Ok(path)
}

/// Stitch every name clip into one review track, with `gap_wav` between
/// consecutive names (not after the last).
pub fn build_names_master(
    engine: &dyn MediaEngine,
    clips: &[PathBuf],
    gap_wav: Option<&Path>,
    out: &Path,
) -> Result<()> {
    if clips.is_empty() {
        bail!("no name clips to stitch");
    }
    let mut inputs: Vec<PathBuf> = Vec::new();
    for (i, clip) in clips.iter().enumerate() {
        inputs.push(clip.clone());
        if let Some(gap) = gap_wav {
            if i + 1 < clips.len() {
                inputs.push(gap.to_path_buf());
            }
        }
    }
    engine.concat_clips(&inputs, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FixedTts {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl FixedTts {
        fn new(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TtsProvider for FixedTts {
        fn name(&self) -> &str {
            "fixed"
        }

        fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    fn fixture(tag: &str) -> (PathBuf, NameCache) {
        let dir =
            std::env::temp_dir().join(format!("namecast_names_{}_{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let cache = NameCache::new(dir.join("cache"), "test-key".into()).unwrap();
        (dir, cache)
    }

    fn batch_fixture() -> (TtsConfig, BatchConfig, DetectConfig) {
        (
            TtsConfig::default(),
            BatchConfig::default(),
            DetectConfig::default(),
        )
    }

    #[test]
    fn test_batch_text_format() {
        let texts = vec!["Asha".to_string(), "Rita".to_string()];
        assert_eq!(batch_text(&texts, "ठहराव"), "Asha. ठहराव\nRita.");
        assert_eq!(batch_text(&texts, "  "), "Asha. ...\nRita.");
        assert_eq!(batch_text(&texts[..1].to_vec(), "ठहराव"), "Asha.");
    }

    #[test]
    fn test_split_ladder_rungs() {
        let cfg = BatchConfig::default();
        let ladder = split_ladder(&cfg);
        assert_eq!(ladder[0], (-40.0, 0.18));
        assert_eq!(ladder[1].0, -35.0);
        assert!((ladder[1].1 - 0.1188).abs() < 1e-9);
        assert_eq!(ladder[2], (-30.0, 0.09));

        // Floors kick in for already-tight configs.
        let tight = BatchConfig {
            split_dur: 0.06,
            ..cfg
        };
        let ladder = split_ladder(&tight);
        assert_eq!(ladder[1].1, 0.08);
        assert_eq!(ladder[2].1, 0.05);
    }

    #[test]
    fn test_ensure_name_clip_synthesizes_once() {
        let (dir, cache) = fixture("single");
        let engine = FakeEngine::new();
        let provider = FixedTts::new(b"MP3A");
        let tts = TtsConfig::default();

        let first = ensure_name_clip(&engine, &provider, &cache, &tts, "Asha").unwrap();
        assert!(first.exists());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let second = ensure_name_clip(&engine, &provider, &cache, &tts, "Asha").unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_batch_assigns_segments_in_order() {
        let (dir, cache) = fixture("batch_order");
        let engine = FakeEngine::new();
        let provider = FixedTts::new(b"BATCH");
        let (tts, batch, detect_cfg) = batch_fixture();

        engine.script_duration("batch.wav", 3.0);
        engine.script_silence(
            "batch.wav",
            "silence_start: 0.8\nsilence_end: 1.1 | d\nsilence_start: 1.9\nsilence_end: 2.2 | d\n",
        );

        let names = vec!["Asha".to_string(), "Rita".to_string(), "Priya".to_string()];
        let clips =
            ensure_name_clips_batch(&engine, &provider, &cache, &tts, &batch, &detect_cfg, &names)
                .unwrap();
        assert_eq!(clips.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let content = |n: &str| fs::read_to_string(&clips[n]).unwrap();
        assert!(content("Asha").starts_with("extract[0.000"));
        assert!(content("Rita").starts_with("extract[1.100"));
        assert!(content("Priya").starts_with("extract[2.200"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_batch_ladder_relaxes_thresholds() {
        let (dir, cache) = fixture("batch_ladder");
        let engine = FakeEngine::new();
        let provider = FixedTts::new(b"BATCH");
        let (tts, batch, detect_cfg) = batch_fixture();

        engine.script_duration("batch.wav", 3.0);
        // First scan hears one pause; the looser rescan hears both.
        engine.script_silence(
            "batch.wav",
            "silence_start: 0.8\nsilence_end: 1.1 | d\n",
        );
        engine.script_silence(
            "batch.wav",
            "silence_start: 0.8\nsilence_end: 1.1 | d\nsilence_start: 1.9\nsilence_end: 2.2 | d\n",
        );

        let names = vec!["Asha".to_string(), "Rita".to_string(), "Priya".to_string()];
        let clips =
            ensure_name_clips_batch(&engine, &provider, &cache, &tts, &batch, &detect_cfg, &names)
                .unwrap();
        assert_eq!(clips.len(), 3);
        assert_eq!(engine.op_count("silencedetect"), 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_batch_shortfall_caches_nothing() {
        let (dir, cache) = fixture("batch_short");
        let engine = FakeEngine::new();
        let provider = FixedTts::new(b"BATCH");
        let (tts, batch, detect_cfg) = batch_fixture();

        engine.script_duration("batch.wav", 3.0);
        // Only one pause no matter how loose the thresholds get.
        engine.script_silence(
            "batch.wav",
            "silence_start: 1.4\nsilence_end: 1.7 | d\n",
        );

        let names = vec!["Asha".to_string(), "Rita".to_string(), "Priya".to_string()];
        let err =
            ensure_name_clips_batch(&engine, &provider, &cache, &tts, &batch, &detect_cfg, &names)
                .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::BatchSplit { found, needed }) => {
                assert_eq!((*found, *needed), (2, 3));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(engine.op_count("silencedetect"), 3);
        for name in &names {
            assert!(!cache.contains(name));
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_batch_all_cached_skips_synthesis() {
        let (dir, cache) = fixture("batch_cached");
        let engine = FakeEngine::new();
        let provider = FixedTts::new(b"BATCH");
        let (tts, batch, detect_cfg) = batch_fixture();

        let seed = dir.join("seed.wav");
        fs::write(&seed, b"W").unwrap();
        cache.install("Asha", &seed).unwrap();
        cache.install("Rita", &seed).unwrap();

        let names = vec!["Asha".to_string(), "Rita".to_string()];
        let clips =
            ensure_name_clips_batch(&engine, &provider, &cache, &tts, &batch, &detect_cfg, &names)
                .unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_silence_wav_generated_once_per_length() {
        let (dir, _cache) = fixture("silence");
        let engine = FakeEngine::new();

        let a = ensure_silence_wav(&engine, &dir, 0.4).unwrap();
        assert_eq!(a.file_name().unwrap(), "_silence_400ms.wav");
        let b = ensure_silence_wav(&engine, &dir, 0.4).unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.op_count("silence"), 1);

        let c = ensure_silence_wav(&engine, &dir, 0.12).unwrap();
        assert_eq!(c.file_name().unwrap(), "_silence_120ms.wav");
        assert_eq!(engine.op_count("silence"), 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_names_master_interleaves_gaps() {
        let (dir, _cache) = fixture("master");
        let engine = FakeEngine::new();
        let clips: Vec<PathBuf> = ["a.wav", "b.wav", "c.wav"]
            .iter()
            .map(|n| {
                let p = dir.join(n);
                fs::write(&p, *n).unwrap();
                p
            })
            .collect();
        let gap = dir.join("gap.wav");
        engine.make_silence(&gap, 0.4).unwrap();

        let out = dir.join("master.wav");
        build_names_master(&engine, &clips, Some(&gap), &out).unwrap();
        let concat_op = engine
            .ops()
            .into_iter()
            .find(|o| o.starts_with("concat"))
            .unwrap();
        assert!(concat_op.contains("ins=a.wav,gap.wav,b.wav,gap.wav,c.wav"));

        assert!(build_names_master(&engine, &[], None, &out).is_err());

        fs::remove_dir_all(&dir).ok();
    }
}
