//! Job orchestration: one base video, many recipients.
//!
//! A job resolves its insertion policy once, optionally prewarms the
//! name cache, then builds every recipient's output in input order.
//! Recipient failures are recorded and skipped rather than aborting the
//! job; configuration failures before the first recipient abort it.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::assemble::{self, AssembleContext};
use crate::cache::{self, CacheStore, NameCache};
use crate::config::{BatchConfig, DetectConfig, LipSyncConfig, TierConfig, TtsConfig};
use crate::engine::MediaEngine;
use crate::error::PipelineError;
use crate::names;
use crate::tier::{self, PlanContext};
use crate::tts::{self, TtsProvider};
use crate::types::{InsertPolicy, RecipientOutcome};

/// Everything one personalization job needs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Base media the names are spliced into.
    pub base_video: PathBuf,
    /// Directory receiving one output per recipient plus the manifest.
    pub out_dir: PathBuf,
    /// Recipient names, in delivery order.
    pub names: Vec<String>,
    /// Plan outputs without touching the engine or any provider.
    pub dry_run: bool,
    /// Prewarm the name cache (batch-first) before per-recipient work.
    pub build_name_cache: bool,
    /// Optional review track stitching every cached name together.
    pub names_master_out: Option<PathBuf>,
    /// Silence between names in the master track.
    pub name_gap: f64,
    /// Override for the name-clip cache directory.
    pub name_cache_dir: Option<PathBuf>,
    pub tier: TierConfig,
    pub detect: DetectConfig,
    pub tts: TtsConfig,
    pub batch: BatchConfig,
    pub lip_sync: LipSyncConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            base_video: PathBuf::new(),
            out_dir: PathBuf::from("output"),
            names: Vec::new(),
            dry_run: false,
            build_name_cache: false,
            names_master_out: None,
            name_gap: 0.4,
            name_cache_dir: None,
            tier: TierConfig::default(),
            detect: DetectConfig::default(),
            tts: TtsConfig::default(),
            batch: BatchConfig::default(),
            lip_sync: LipSyncConfig::default(),
        }
    }
}

/// What happened to each recipient, in input order.
#[derive(Debug)]
pub struct JobReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl JobReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Trim, drop empties, and dedupe while preserving first-seen order.
fn unique_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let name = name.trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

/// Slugs claimed by more than one distinct name in this job.
fn colliding_slugs(names: &[String]) -> HashSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for name in names {
        *counts.entry(cache::safe_slug(name)).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(slug, _)| slug)
        .collect()
}

/// Output file name for a recipient; colliding slugs get a short hash of
/// the exact name so neither output overwrites the other.
fn output_file_name(name: &str, policy: InsertPolicy, collisions: &HashSet<String>) -> String {
    let slug = cache::safe_slug(name);
    let ext = policy.output_extension();
    if collisions.contains(&slug) {
        format!("{}_{}.{}", slug, &cache::hash12(name)[..6], ext)
    } else {
        format!("{}.{}", slug, ext)
    }
}

struct RunContext<'a> {
    engine: &'a dyn MediaEngine,
    cfg: &'a JobConfig,
    policy: InsertPolicy,
    provider: &'a dyn TtsProvider,
    name_cache: &'a NameCache,
    base_duration: f64,
}

fn build_one(run: &RunContext, name: &str, cached: Option<&PathBuf>, output: &Path) -> Result<()> {
    let clip = match cached {
        Some(p) => p.clone(),
        None => names::ensure_name_clip(run.engine, run.provider, run.name_cache, &run.cfg.tts, name)?,
    };
    let name_duration = run.engine.probe_duration(&clip)?;

    let scratch = tempfile::tempdir().context("Failed to create scratch dir")?;
    let base_audio = scratch.path().join("base_full.wav");
    run.engine
        .to_canonical_wav(&run.cfg.base_video, &base_audio)?;

    let plan = tier::plan_insertion(
        run.engine,
        run.policy,
        &PlanContext {
            base_video: &run.cfg.base_video,
            base_audio: &base_audio,
            base_duration: run.base_duration,
            name_clip: &clip,
            name_duration,
        },
        &run.cfg.tier,
        &run.cfg.detect,
    )?;

    assemble::assemble(
        run.engine,
        &plan,
        &AssembleContext {
            base_video: &run.cfg.base_video,
            base_audio: &base_audio,
            work_dir: scratch.path(),
        },
        &run.cfg.tier,
        output,
    )?;

    if plan.policy.is_video() {
        assemble::apply_lip_sync(output, &run.cfg.lip_sync)?;
    }
    Ok(())
}

fn write_manifest(out_dir: &Path, report: &JobReport) -> Result<()> {
    let manifest = serde_json::json!({
        "outcomes": report.outcomes,
        "succeeded": report.succeeded(),
        "failed": report.failed(),
    });
    let path = out_dir.join("manifest.json");
    fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Run a whole personalization job. Per-recipient failures are recorded
/// in the report; only setup failures abort.
pub fn run_job(engine: &dyn MediaEngine, cfg: &JobConfig) -> Result<JobReport> {
    if !cfg.base_video.exists() {
        return Err(PipelineError::Configuration(format!(
            "base video not found: {}",
            cfg.base_video.display()
        ))
        .into());
    }
    let policy = tier::resolve_policy(cfg.tier.tier, cfg.tier.position, cfg.tier.diamond_natural)?;
    let names = unique_names(&cfg.names);
    if names.is_empty() {
        return Err(PipelineError::Configuration("no recipient names given".into()).into());
    }
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("Failed to create output dir: {}", cfg.out_dir.display()))?;
    let collisions = colliding_slugs(&names);

    if cfg.dry_run {
        let mut outcomes = Vec::new();
        for name in &names {
            let output = cfg.out_dir.join(output_file_name(name, policy, &collisions));
            log::info!("[dry-run] Would create: {}", output.display());
            outcomes.push(RecipientOutcome {
                name: name.clone(),
                output: Some(output),
                error: None,
            });
        }
        return Ok(JobReport { outcomes });
    }

    engine.check_available()?;
    let mut store = CacheStore::open(cache::cache_dir().join("voices.json"))?;
    let provider = tts::get_provider(&cfg.tts, &mut store)?;
    let cache_dir = cfg
        .name_cache_dir
        .clone()
        .unwrap_or_else(|| cache::cache_dir().join("names"));
    let name_cache = NameCache::new(cache_dir, cache::name_cache_key(&cfg.tts)?)?;

    // --- Prewarm ---
    let mut clips: HashMap<String, PathBuf> = HashMap::new();
    if cfg.build_name_cache {
        log::info!("Building name audio cache for {} unique names", names.len());
        if cfg.batch.enabled {
            match names::ensure_name_clips_batch(
                engine,
                provider.as_ref(),
                &name_cache,
                &cfg.tts,
                &cfg.batch,
                &cfg.detect,
                &names,
            ) {
                Ok(map) => clips = map,
                Err(e) => {
                    log::warn!("Batch synthesis failed, falling back to per-name: {:#}", e)
                }
            }
        }
        for name in &names {
            if clips.contains_key(name) {
                continue;
            }
            let clip =
                names::ensure_name_clip(engine, provider.as_ref(), &name_cache, &cfg.tts, name)?;
            clips.insert(name.clone(), clip);
        }

        if let Some(master_out) = &cfg.names_master_out {
            let gap = if cfg.name_gap > 0.0 {
                Some(names::ensure_silence_wav(
                    engine,
                    name_cache.dir(),
                    cfg.name_gap,
                )?)
            } else {
                None
            };
            let ordered: Vec<PathBuf> = names.iter().map(|n| clips[n].clone()).collect();
            names::build_names_master(engine, &ordered, gap.as_deref(), master_out)?;
            log::info!("Created names master: {}", master_out.display());
        }
    }

    // --- Per-recipient build ---
    let base_duration = engine.probe_duration(&cfg.base_video)?;
    let run = RunContext {
        engine,
        cfg,
        policy,
        provider: provider.as_ref(),
        name_cache: &name_cache,
        base_duration,
    };
    log::info!("Generating {} outputs", names.len());
    let mut outcomes = Vec::new();
    for name in &names {
        let output = cfg.out_dir.join(output_file_name(name, policy, &collisions));
        match build_one(&run, name, clips.get(name), &output) {
            Ok(()) => {
                log::info!("Created: {}", output.display());
                outcomes.push(RecipientOutcome {
                    name: name.clone(),
                    output: Some(output),
                    error: None,
                });
            }
            Err(e) => {
                log::error!("Failed for {}: {:#}", name, e);
                outcomes.push(RecipientOutcome {
                    name: name.clone(),
                    output: None,
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }

    let report = JobReport { outcomes };
    write_manifest(&cfg.out_dir, &report)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::types::Tier;

    fn job_fixture(tag: &str) -> (PathBuf, JobConfig) {
        let dir = std::env::temp_dir().join(format!("namecast_job_{}_{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let base = dir.join("base.mp4");
        fs::write(&base, "V").unwrap();
        let cfg = JobConfig {
            base_video: base,
            out_dir: dir.join("out"),
            names: vec!["Asha".into(), "Rita".into()],
            name_cache_dir: Some(dir.join("names")),
            tts: TtsConfig {
                provider: "command".into(),
                tts_cmd: "sh -c 'printf MP3 > {out}'".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        (dir, cfg)
    }

    #[test]
    fn test_unique_names_preserve_order() {
        let names = vec![
            " Asha ".to_string(),
            "Rita".to_string(),
            "Asha".to_string(),
            "".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(unique_names(&names), vec!["Asha", "Rita"]);
    }

    #[test]
    fn test_output_names_disambiguate_collisions() {
        let names = vec!["Asha Rao".to_string(), "Asha.Rao".to_string()];
        let collisions = colliding_slugs(&names);
        let a = output_file_name("Asha Rao", InsertPolicy::Silver, &collisions);
        let b = output_file_name("Asha.Rao", InsertPolicy::Silver, &collisions);
        assert_ne!(a, b);
        assert!(a.starts_with("Asha_Rao_") && a.ends_with(".mp3"));

        // A name with the slug to itself keeps the bare form.
        let c = output_file_name("Rita", InsertPolicy::GoldFit, &collisions);
        assert_eq!(c, "Rita.mp4");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let (dir, mut cfg) = job_fixture("dry");
        cfg.dry_run = true;
        // Even a provider that cannot synthesize is fine in dry-run.
        cfg.tts.provider = "none".into();
        let engine = FakeEngine::new();

        let report = run_job(&engine, &cfg).unwrap();
        assert_eq!(report.succeeded(), 2);
        assert!(engine.ops().is_empty());
        assert!(!cfg.out_dir.join("manifest.json").exists());
        let first = report.outcomes[0].output.as_ref().unwrap();
        assert_eq!(first.file_name().unwrap(), "Asha.mp3");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_silver_job_end_to_end() {
        let (dir, cfg) = job_fixture("silver");
        let engine = FakeEngine::new();
        engine.script_duration("base.mp4", 5.0);
        engine.script_duration("tts.mp3", 0.8);
        engine.script_silence("base.mp4", "silence_start: 0.4\n");

        let report = run_job(&engine, &cfg).unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 0);

        let out = cfg.out_dir.join("Asha.mp3");
        let content = fs::read_to_string(&out).unwrap();
        assert_eq!(
            content,
            "mp3[true](concat(wav(MP3)+silence[0.120]+extract[0.400,end](wav(V))))"
        );

        let manifest = fs::read_to_string(cfg.out_dir.join("manifest.json")).unwrap();
        assert!(manifest.contains("\"succeeded\": 2"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_recipient_failure_does_not_abort_job() {
        let (dir, mut cfg) = job_fixture("bulkhead");
        // Synthesis fails only for Rita; Asha still renders.
        cfg.tts.tts_cmd =
            "sh -c 'case {text} in *Rita*) exit 1;; *) printf MP3 > {out};; esac'".into();
        let engine = FakeEngine::new();
        engine.script_duration("base.mp4", 5.0);
        engine.script_duration("tts.mp3", 0.8);
        engine.script_silence("base.mp4", "silence_start: 0.4\n");

        let report = run_job(&engine, &cfg).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(cfg.out_dir.join("Asha.mp3").exists());
        assert!(report.outcomes[1].error.is_some());

        let manifest = fs::read_to_string(cfg.out_dir.join("manifest.json")).unwrap();
        assert!(manifest.contains("\"failed\": 1"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_prewarm_batch_then_reuse() {
        let (dir, mut cfg) = job_fixture("prewarm");
        cfg.build_name_cache = true;
        cfg.names_master_out = Some(dir.join("master.wav"));
        let engine = FakeEngine::new();
        engine.script_duration("base.mp4", 5.0);
        engine.script_duration("batch.wav", 3.0);
        engine.script_silence("base.mp4", "silence_start: 0.4\n");
        // One pause splits the take into two name segments.
        engine.script_silence("batch.wav", "silence_start: 0.9\nsilence_end: 1.3 | d\n");

        let report = run_job(&engine, &cfg).unwrap();
        assert_eq!(report.succeeded(), 2);
        assert!(dir.join("master.wav").exists());
        // The whole job synthesized exactly once (the batch take).
        assert_eq!(engine.op_count("canonical in=batch.mp3"), 1);
        assert_eq!(engine.op_count("canonical in=tts.mp3"), 0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_base_is_configuration_error() {
        let cfg = JobConfig {
            base_video: PathBuf::from("/nonexistent/base.mp4"),
            names: vec!["Asha".into()],
            ..Default::default()
        };
        let err = run_job(&FakeEngine::new(), &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_unsupported_tier_position_aborts_job() {
        let (dir, mut cfg) = job_fixture("tier_gate");
        cfg.tier.tier = Tier::Platinum;
        cfg.tier.position = crate::types::NamePosition::End;

        let err = run_job(&FakeEngine::new(), &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Configuration(_))
        ));

        fs::remove_dir_all(&dir).ok();
    }
}
