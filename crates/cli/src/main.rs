//! namecast CLI: personalized name insertion into base audio/video.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use namecast_core::cache;
use namecast_core::config::{BatchConfig, DetectConfig, LipSyncConfig, TierConfig, TtsConfig};
use namecast_core::detect;
use namecast_core::engine::{FfmpegEngine, MediaEngine};
use namecast_core::pipeline::{run_job, JobConfig, JobReport};
use namecast_core::types::{NamePosition, Tier};

// ─── Top-level CLI ───────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "namecast",
    about = "Splice each recipient's spoken name into a base recording",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one personalized output per recipient
    Build(BuildArgs),
    /// Print the silence/speech structure of a media file
    Probe(ProbeArgs),
    /// Wipe the namecast cache directory
    ClearCache,
}

// ─── Shared argument groups ──────────────────────────────────────

#[derive(Parser, Debug)]
struct TtsArgs {
    /// TTS provider
    #[arg(long, default_value = "gtts", value_parser = ["gtts", "elevenlabs", "command", "none"])]
    tts_provider: String,

    /// Spoken text per recipient; {name} is substituted
    #[arg(long, default_value = "{name}")]
    text: String,

    /// Language code passed to the provider
    #[arg(long, default_value = "hi")]
    lang: String,

    /// Command template for --tts-provider command ({text}, {out}, {voice})
    #[arg(long, default_value = "")]
    tts_cmd: String,

    /// Reference speech sample for voice cloning ({voice} in --tts-cmd)
    #[arg(long)]
    voice_sample: Option<PathBuf>,

    /// ElevenLabs API key (otherwise ELEVENLABS_API_KEY)
    #[arg(long)]
    elevenlabs_api_key: Option<String>,

    /// ElevenLabs voice id (otherwise ELEVENLABS_VOICE_ID)
    #[arg(long)]
    elevenlabs_voice_id: Option<String>,

    /// ElevenLabs model id (otherwise ELEVENLABS_MODEL_ID)
    #[arg(long)]
    elevenlabs_model_id: Option<String>,

    /// ElevenLabs speaking-rate multiplier (0.7 to 1.2)
    #[arg(long)]
    elevenlabs_speed: Option<f64>,
}

#[derive(Parser, Debug)]
struct CacheArgs {
    /// Synthesize and cache every unique name before rendering
    #[arg(long, default_value_t = false)]
    build_name_cache: bool,

    /// Batch all uncached names into one TTS call [use --no-batch-name-tts to disable]
    #[arg(long, default_value_t = true)]
    batch_name_tts: bool,

    /// Disable batched name synthesis
    #[arg(long, overrides_with = "batch_name_tts")]
    no_batch_name_tts: bool,

    /// Silence threshold for splitting the batch take (dB)
    #[arg(long, default_value_t = -40.0, allow_hyphen_values = true)]
    batch_split_silence_db: f64,

    /// Minimum inter-name silence in the batch take (seconds)
    #[arg(long, default_value_t = 0.18)]
    batch_split_silence_dur: f64,

    /// Word spoken between names to force a pause
    #[arg(long, default_value = "ठहराव")]
    batch_gap_hint: String,

    /// Directory for cached name clips (default: cache dir under HOME)
    #[arg(long)]
    name_cache_dir: Option<PathBuf>,

    /// Write a review track of all cached names to this path
    #[arg(long)]
    names_master_out: Option<PathBuf>,

    /// Silence between names in the master track (seconds)
    #[arg(long, default_value_t = 0.4)]
    name_gap: f64,
}

#[derive(Parser, Debug)]
struct TuningArgs {
    /// Silence threshold for speech boundary detection (dB)
    #[arg(long, default_value_t = -30.0, allow_hyphen_values = true)]
    silence_db: f64,

    /// Minimum silence duration for speech boundary detection (seconds)
    #[arg(long, default_value_t = 0.3)]
    silence_dur: f64,

    /// Match inserted name loudness to nearby base audio [use --no-match-name-loudness to disable]
    #[arg(long, default_value_t = true)]
    match_name_loudness: bool,

    /// Disable name loudness matching
    #[arg(long, overrides_with = "match_name_loudness")]
    no_match_name_loudness: bool,

    /// Max gain/attenuation applied for loudness matching (dB)
    #[arg(long, default_value_t = 8.0)]
    name_loudness_max_gain_db: f64,

    /// Silver: minimum seconds replaced at the first spoken name
    #[arg(long, default_value_t = 0.45)]
    silver_replace_seconds: f64,

    /// Silver: silence gap after the name (seconds)
    #[arg(long, default_value_t = 0.12)]
    silver_gap_seconds: f64,

    /// Diamond: silence gap after the name (seconds)
    #[arg(long, default_value_t = 0.12)]
    diamond_gap_seconds: f64,

    /// Gold: hard cap on the fitted name slot (seconds)
    #[arg(long, default_value_t = 0.50)]
    gold_max_name_seconds: f64,

    /// Gold: silence duration for slot boundary detection (seconds)
    #[arg(long, default_value_t = 0.05)]
    gold_detect_silence_dur: f64,

    /// Gold: untouched guard kept at the slot end (seconds)
    #[arg(long, default_value_t = 0.08)]
    gold_end_guard_seconds: f64,

    /// Platinum: comma-separated placeholder markers, in spoken order
    #[arg(long, default_value = "NAME1,NAME2")]
    platinum_placeholders: String,

    /// Platinum: silence duration used to split marker segments (seconds)
    #[arg(long, default_value_t = 0.20)]
    platinum_min_silence_dur: f64,

    /// Platinum: max duration of a placeholder marker segment (seconds)
    #[arg(long, default_value_t = 0.90)]
    platinum_max_placeholder_seconds: f64,
}

#[derive(Parser, Debug)]
struct LipSyncArgs {
    /// Lip-sync pass over rendered videos
    #[arg(long, default_value = "none", value_parser = ["none", "wav2lip", "sync_api"])]
    lip_sync_provider: String,

    /// Path to a Wav2Lip checkout (otherwise WAV2LIP_REPO)
    #[arg(long)]
    wav2lip_repo: Option<PathBuf>,

    /// Path to a Wav2Lip checkpoint (otherwise WAV2LIP_CHECKPOINT)
    #[arg(long)]
    wav2lip_checkpoint: Option<PathBuf>,

    /// Wav2Lip face padding as 'top bottom left right'
    #[arg(long, default_value = "0 10 0 0")]
    wav2lip_pads: String,

    /// Python executable used to run Wav2Lip
    #[arg(long, default_value = "python3")]
    wav2lip_python: String,
}

// ─── Build ───────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(about = "Render one personalized output per recipient")]
struct BuildArgs {
    /// Base video (or audio) the names are spliced into
    #[arg(long)]
    video: PathBuf,

    /// Comma-separated recipient names
    #[arg(long)]
    names: Option<String>,

    /// File of recipient names, one per line
    #[arg(long)]
    names_file: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "output")]
    outdir: PathBuf,

    /// Personalization tier
    #[arg(long, default_value = "silver")]
    tier: Tier,

    /// Where the name lands relative to the narration
    #[arg(long, default_value = "start")]
    name_position: NamePosition,

    /// Diamond: splice the name at natural speed instead of fitting
    #[arg(long, default_value_t = false)]
    diamond_natural_name: bool,

    #[command(flatten)]
    tts: TtsArgs,

    #[command(flatten)]
    cache: CacheArgs,

    #[command(flatten)]
    tuning: TuningArgs,

    #[command(flatten)]
    lip_sync: LipSyncArgs,

    /// Bundle the rendered outputs into outputs.zip
    #[arg(long, default_value_t = false)]
    zip: bool,

    /// Print planned outputs without rendering anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Show verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

// ─── Probe ───────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(about = "Print the silence/speech structure of a media file")]
struct ProbeArgs {
    /// Media file to inspect
    input: PathBuf,

    /// Silence threshold (dB)
    #[arg(long, default_value_t = -30.0, allow_hyphen_values = true)]
    silence_db: f64,

    /// Minimum silence duration to report (seconds)
    #[arg(long, default_value_t = 0.3)]
    silence_dur: f64,

    /// Show verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

// ─── Main ────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    // Init logging
    let log_level = match &cli.command {
        Command::Build(a) if a.verbose => "debug",
        Command::Probe(a) if a.verbose => "debug",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Command::Build(args) => run_build(args),
        Command::Probe(args) => run_probe(args),
        Command::ClearCache => run_clear_cache(),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Gather recipient names from the flag and/or file, in the order given.
/// File lines starting with `#` are comments. Trimming, empty-drop and
/// dedupe happen inside the job.
fn collect_names(names: Option<&str>, names_file: Option<&Path>) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if let Some(list) = names {
        out.extend(list.split(',').map(|s| s.to_string()));
    }
    if let Some(path) = names_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read names file: {}", path.display()))?;
        out.extend(
            text.lines()
                .filter(|line| !line.trim_start().starts_with('#'))
                .map(|s| s.to_string()),
        );
    }
    if out.is_empty() {
        bail!("No recipient names given (use --names and/or --names-file)");
    }
    Ok(out)
}

fn job_config(args: &BuildArgs) -> JobConfig {
    JobConfig {
        base_video: args.video.clone(),
        out_dir: args.outdir.clone(),
        names: Vec::new(),
        dry_run: args.dry_run,
        build_name_cache: args.cache.build_name_cache,
        names_master_out: args.cache.names_master_out.clone(),
        name_gap: args.cache.name_gap,
        name_cache_dir: args.cache.name_cache_dir.clone(),
        tier: TierConfig {
            tier: args.tier,
            position: args.name_position,
            diamond_natural: args.diamond_natural_name,
            match_loudness: args.tuning.match_name_loudness && !args.tuning.no_match_name_loudness,
            max_gain_db: args.tuning.name_loudness_max_gain_db,
            silver_replace_seconds: args.tuning.silver_replace_seconds,
            silver_gap_seconds: args.tuning.silver_gap_seconds,
            diamond_gap_seconds: args.tuning.diamond_gap_seconds,
            gold_max_name_seconds: args.tuning.gold_max_name_seconds,
            gold_detect_silence_dur: args.tuning.gold_detect_silence_dur,
            gold_end_guard_seconds: args.tuning.gold_end_guard_seconds,
            platinum_placeholders: args.tuning.platinum_placeholders.clone(),
            platinum_min_silence_dur: args.tuning.platinum_min_silence_dur,
            platinum_max_placeholder_seconds: args.tuning.platinum_max_placeholder_seconds,
            ..TierConfig::default()
        },
        detect: DetectConfig {
            silence_db: args.tuning.silence_db,
            silence_dur: args.tuning.silence_dur,
            ..DetectConfig::default()
        },
        tts: TtsConfig {
            provider: args.tts.tts_provider.clone(),
            lang: args.tts.lang.clone(),
            text_template: args.tts.text.clone(),
            tts_cmd: args.tts.tts_cmd.clone(),
            voice_sample: args.tts.voice_sample.clone(),
            api_key: args
                .tts
                .elevenlabs_api_key
                .clone()
                .or_else(|| std::env::var("ELEVENLABS_API_KEY").ok()),
            voice_id: args
                .tts
                .elevenlabs_voice_id
                .clone()
                .or_else(|| std::env::var("ELEVENLABS_VOICE_ID").ok()),
            model_id: args
                .tts
                .elevenlabs_model_id
                .clone()
                .or_else(|| std::env::var("ELEVENLABS_MODEL_ID").ok()),
            speed: args.tts.elevenlabs_speed,
        },
        batch: BatchConfig {
            enabled: args.cache.batch_name_tts && !args.cache.no_batch_name_tts,
            split_db: args.cache.batch_split_silence_db,
            split_dur: args.cache.batch_split_silence_dur,
            gap_hint: args.cache.batch_gap_hint.clone(),
        },
        lip_sync: LipSyncConfig {
            provider: args.lip_sync.lip_sync_provider.clone(),
            repo: args.lip_sync.wav2lip_repo.clone(),
            checkpoint: args.lip_sync.wav2lip_checkpoint.clone(),
            pads: args.lip_sync.wav2lip_pads.clone(),
            python: args.lip_sync.wav2lip_python.clone(),
        },
    }
}

/// Bundle the rendered outputs into one deflate-compressed archive.
fn zip_outputs(report: &JobReport, zip_path: &Path) -> Result<()> {
    let zip_file = fs::File::create(zip_path)
        .with_context(|| format!("Failed to create {}", zip_path.display()))?;
    let mut zip = zip::ZipWriter::new(zip_file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for outcome in &report.outcomes {
        let path = match &outcome.output {
            Some(p) if outcome.error.is_none() => p,
            _ => continue,
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("Output has no file name: {}", path.display()))?;
        zip.start_file(&name, options)?;
        let data = fs::read(path)?;
        std::io::Write::write_all(&mut zip, &data)?;
    }
    zip.finish()?;
    log::info!("Created {}", zip_path.display());
    Ok(())
}

// ─── Build runner ────────────────────────────────────────────────

fn run_build(args: BuildArgs) -> Result<()> {
    let names = collect_names(args.names.as_deref(), args.names_file.as_deref())?;
    let mut cfg = job_config(&args);
    cfg.names = names;

    let engine = FfmpegEngine::new();
    let report = run_job(&engine, &cfg)?;

    if args.zip && !args.dry_run && report.succeeded() > 0 {
        zip_outputs(&report, &args.outdir.join("outputs.zip"))?;
    }

    println!("Done. {} created, {} failed.", report.succeeded(), report.failed());
    Ok(())
}

// ─── Probe runner ────────────────────────────────────────────────

fn run_probe(args: ProbeArgs) -> Result<()> {
    if !args.input.exists() {
        bail!("File not found: {}", args.input.display());
    }
    let engine = FfmpegEngine::new();
    engine.check_available()?;

    let detect_cfg = DetectConfig {
        silence_db: args.silence_db,
        silence_dur: args.silence_dur,
        ..DetectConfig::default()
    };

    let duration = engine.probe_duration(&args.input)?;
    println!("Duration: {:.3} s", duration);

    let report = engine.detect_silence(&args.input, args.silence_db, args.silence_dur)?;
    let events = detect::parse_silence_events(&report);
    let silences = detect::silence_intervals(&events);
    println!(
        "Silence intervals at {} dB / {} s: {}",
        args.silence_db,
        args.silence_dur,
        silences.len()
    );
    for iv in &silences {
        println!("  {:8.3} .. {:8.3}  ({:.3} s)", iv.start, iv.end, iv.end - iv.start);
    }

    let segments = detect::complement_segments(&silences, duration, detect_cfg.min_segment);
    println!("Speech segments: {}", segments.len());
    for seg in &segments {
        println!("  {:8.3} .. {:8.3}  ({:.3} s)", seg.start, seg.end, seg.duration());
    }

    match detect::first_speech_from_events(&events, &detect_cfg) {
        Some(seg) => println!("First speech: {:.3} .. {:.3} s", seg.start, seg.end),
        None => println!("First speech: not detected"),
    }
    Ok(())
}

// ─── Clear-cache runner ──────────────────────────────────────────

fn run_clear_cache() -> Result<()> {
    let dir = cache::cache_dir();
    let (files, dirs) = cache::clear_cache(&dir)?;
    println!(
        "Cleared {} ({} files, {} directories removed)",
        dir.display(),
        files,
        dirs
    );
    Ok(())
}
