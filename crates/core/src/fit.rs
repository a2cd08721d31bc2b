//! Time-stretch planning and loudness matching.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::engine::MediaEngine;

/// Corrections smaller than this are inaudible; skip the re-encode.
const GAIN_EPSILON_DB: f64 = 0.3;

/// Decompose a tempo ratio into stages acceptable to atempo (0.5..=2.0).
///
/// Ratios above 2.0 peel off 2.0 stages, ratios below 0.5 peel off 0.5
/// stages, and the residual lands inside the legal range. Non-positive
/// ratios collapse to a single identity stage.
pub fn stretch_factor_chain(speed: f64) -> Vec<f64> {
    if speed <= 0.0 {
        return vec![1.0];
    }
    let mut stages = Vec::new();
    let mut remaining = speed;
    while remaining > 2.0 {
        stages.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push(0.5);
        remaining /= 0.5;
    }
    stages.push(remaining);
    stages
}

/// Bring `source` to the loudness of `reference`, writing the result
/// (gained or copied through) to `out`.
///
/// The correction is clamped to +/- `max_gain_db` and skipped entirely
/// when inaudible. A failed measurement degrades to an unmatched copy
/// rather than failing the recipient.
pub fn match_loudness(
    engine: &dyn MediaEngine,
    source: &Path,
    reference: &Path,
    out: &Path,
    max_gain_db: f64,
) -> Result<()> {
    let source_db = engine.measure_mean_volume(source, None)?;
    let reference_db = engine.measure_mean_volume(reference, None)?;
    let (source_db, reference_db) = match (source_db, reference_db) {
        (Some(s), Some(r)) => (s, r),
        _ => {
            log::warn!(
                "loudness measurement failed for {}; splicing name at original level",
                source.display()
            );
            fs::copy(source, out)?;
            return Ok(());
        }
    };

    let gain = (reference_db - source_db).clamp(-max_gain_db, max_gain_db);
    if gain.abs() < GAIN_EPSILON_DB {
        fs::copy(source, out)?;
        return Ok(());
    }
    log::info!(
        "Matching loudness: {:.1} dB -> {:.1} dB (gain {:+.1} dB)",
        source_db,
        reference_db,
        gain
    );
    engine.apply_gain(source, out, gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use std::path::PathBuf;

    #[test]
    fn test_chain_identity() {
        assert_eq!(stretch_factor_chain(1.0), vec![1.0]);
        assert_eq!(stretch_factor_chain(1.7), vec![1.7]);
    }

    #[test]
    fn test_chain_speeds_up() {
        assert_eq!(stretch_factor_chain(3.0), vec![2.0, 1.5]);
        assert_eq!(stretch_factor_chain(8.0), vec![2.0, 2.0, 2.0, 1.0]);
    }

    #[test]
    fn test_chain_slows_down() {
        let chain = stretch_factor_chain(0.3);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], 0.5);
        assert!((chain[1] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_chain_degenerate_ratio() {
        assert_eq!(stretch_factor_chain(0.0), vec![1.0]);
        assert_eq!(stretch_factor_chain(-2.0), vec![1.0]);
    }

    #[test]
    fn test_chain_product_and_range() {
        for speed in [0.1, 0.49, 0.5, 0.97, 2.0, 2.01, 5.5, 13.0] {
            let chain = stretch_factor_chain(speed);
            let product: f64 = chain.iter().product();
            assert!((product - speed).abs() < 1e-9, "speed {}", speed);
            for stage in chain {
                assert!((0.5..=2.0).contains(&stage), "stage {} for {}", stage, speed);
            }
        }
    }

    fn loudness_fixture(tag: &str) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("namecast_fit_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let source = dir.join("name.wav");
        let reference = dir.join("slot.wav");
        let out = dir.join("matched.wav");
        std::fs::write(&source, "NAME-AUDIO").unwrap();
        std::fs::write(&reference, "SLOT-AUDIO").unwrap();
        (dir, source, reference, out)
    }

    #[test]
    fn test_equal_loudness_copies_bytes() {
        let (dir, source, reference, out) = loudness_fixture("equal");
        let engine = FakeEngine::new();
        engine.script_volume("name.wav", -21.0);
        engine.script_volume("slot.wav", -21.0);

        match_loudness(&engine, &source, &reference, &out, 8.0).unwrap();
        assert_eq!(
            std::fs::read(&out).unwrap(),
            std::fs::read(&source).unwrap()
        );
        assert_eq!(engine.op_count("gain"), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_measurement_copies_bytes() {
        let (dir, source, reference, out) = loudness_fixture("nomeasure");
        let engine = FakeEngine::new();
        // No scripted volumes: measurement comes back None.
        match_loudness(&engine, &source, &reference, &out, 8.0).unwrap();
        assert_eq!(
            std::fs::read(&out).unwrap(),
            std::fs::read(&source).unwrap()
        );
        assert_eq!(engine.op_count("gain"), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_gain_is_clamped() {
        let (dir, source, reference, out) = loudness_fixture("clamp");
        let engine = FakeEngine::new();
        engine.script_volume("name.wav", -10.0);
        engine.script_volume("slot.wav", -30.0);

        match_loudness(&engine, &source, &reference, &out, 8.0).unwrap();
        let ops = engine.ops();
        let gain_op = ops.iter().find(|o| o.starts_with("gain")).unwrap();
        assert!(gain_op.contains("db=-8.000"), "{}", gain_op);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_tiny_gain_skipped() {
        let (dir, source, reference, out) = loudness_fixture("tiny");
        let engine = FakeEngine::new();
        engine.script_volume("name.wav", -20.0);
        engine.script_volume("slot.wav", -20.2);

        match_loudness(&engine, &source, &reference, &out, 8.0).unwrap();
        assert_eq!(engine.op_count("gain"), 0);
        assert_eq!(
            std::fs::read(&out).unwrap(),
            std::fs::read(&source).unwrap()
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
