//! Scripted in-memory engine for tests.
//!
//! Created files hold a small provenance string as their content, and
//! durations propagate through edits the way real media would: extracts
//! subtract, concats add, fits pin to the target. Tests script inputs by
//! file name and assert on the recorded operation log.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{MediaEngine, MuxMode};

#[derive(Default)]
struct State {
    durations_by_name: HashMap<String, f64>,
    durations_by_content: HashMap<String, f64>,
    silence_reports: HashMap<String, Vec<String>>,
    silence_calls: HashMap<String, usize>,
    volumes: HashMap<String, f64>,
    ops: Vec<String>,
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the duration of an input file, keyed by file name.
    pub fn script_duration(&self, name: &str, seconds: f64) {
        let mut st = self.state.lock().unwrap();
        st.durations_by_name.insert(name.into(), seconds);
    }

    /// Queue a silencedetect report for a file name. Repeated calls
    /// queue further reports; the last one repeats once drained.
    pub fn script_silence(&self, name: &str, report: &str) {
        let mut st = self.state.lock().unwrap();
        st.silence_reports
            .entry(name.into())
            .or_default()
            .push(report.into());
    }

    /// Declare a mean-volume measurement for a file name.
    pub fn script_volume(&self, name: &str, db: f64) {
        let mut st = self.state.lock().unwrap();
        st.volumes.insert(name.into(), db);
    }

    /// Recorded operations, oldest first.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    /// How many recorded operations start with `prefix`.
    pub fn op_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    fn log(&self, op: String) {
        self.state.lock().unwrap().ops.push(op);
    }

    fn lookup_duration(&self, path: &Path) -> Option<f64> {
        let st = self.state.lock().unwrap();
        if let Some(d) = st.durations_by_name.get(&file_name(path)) {
            return Some(*d);
        }
        let content = read_content(path)?;
        st.durations_by_content.get(&content).copied()
    }

    fn write_output(&self, out: &Path, content: String, duration: Option<f64>) -> Result<()> {
        fs::write(out, &content)?;
        if let Some(d) = duration {
            let mut st = self.state.lock().unwrap();
            st.durations_by_content.insert(content, d);
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn read_content(path: &Path) -> Option<String> {
    fs::read(path)
        .ok()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
}

impl MediaEngine for FakeEngine {
    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    fn probe_duration(&self, path: &Path) -> Result<f64> {
        self.lookup_duration(path)
            .ok_or_else(|| anyhow!("no scripted duration for {}", file_name(path)))
    }

    fn detect_silence(&self, path: &Path, noise_db: f64, min_dur: f64) -> Result<String> {
        let name = file_name(path);
        self.log(format!(
            "silencedetect file={} noise={} d={}",
            name, noise_db, min_dur
        ));
        let mut st = self.state.lock().unwrap();
        let reports = st
            .silence_reports
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted silence report for {}", name))?;
        let calls = st.silence_calls.entry(name).or_insert(0);
        let report = reports[(*calls).min(reports.len() - 1)].clone();
        *calls += 1;
        Ok(report)
    }

    fn measure_mean_volume(
        &self,
        path: &Path,
        _window: Option<(f64, f64)>,
    ) -> Result<Option<f64>> {
        let name = file_name(path);
        self.log(format!("volumedetect file={}", name));
        Ok(self.state.lock().unwrap().volumes.get(&name).copied())
    }

    fn to_canonical_wav(&self, input: &Path, out: &Path) -> Result<()> {
        let parent = read_content(input).unwrap_or_default();
        let duration = self.lookup_duration(input);
        self.log(format!(
            "canonical in={} out={}",
            file_name(input),
            file_name(out)
        ));
        self.write_output(out, format!("wav({})", parent), duration)
    }

    fn extract_clip(
        &self,
        input: &Path,
        out: &Path,
        start: f64,
        duration: Option<f64>,
    ) -> Result<()> {
        let parent = read_content(input).unwrap_or_default();
        let child = duration.or_else(|| self.lookup_duration(input).map(|d| d - start));
        let dur_str = duration
            .map(|d| format!("{:.3}", d))
            .unwrap_or_else(|| "end".into());
        self.log(format!(
            "extract in={} out={} start={:.3} dur={}",
            file_name(input),
            file_name(out),
            start,
            dur_str
        ));
        self.write_output(
            out,
            format!("extract[{:.3},{}]({})", start, dur_str, parent),
            child,
        )
    }

    fn concat_clips(&self, inputs: &[PathBuf], out: &Path) -> Result<()> {
        let mut total = Some(0.0);
        let mut parts = Vec::new();
        for input in inputs {
            parts.push(read_content(input).unwrap_or_default());
            total = match (total, self.lookup_duration(input)) {
                (Some(acc), Some(d)) => Some(acc + d),
                _ => None,
            };
        }
        self.log(format!(
            "concat n={} ins={} out={}",
            inputs.len(),
            inputs
                .iter()
                .map(|i| file_name(i))
                .collect::<Vec<_>>()
                .join(","),
            file_name(out)
        ));
        self.write_output(out, format!("concat({})", parts.join("+")), total)
    }

    fn apply_gain(&self, input: &Path, out: &Path, gain_db: f64) -> Result<()> {
        let parent = read_content(input).unwrap_or_default();
        let duration = self.lookup_duration(input);
        self.log(format!(
            "gain in={} out={} db={:.3}",
            file_name(input),
            file_name(out),
            gain_db
        ));
        self.write_output(out, format!("gain[{:.3}]({})", gain_db, parent), duration)
    }

    fn fit_to_duration(
        &self,
        input: &Path,
        out: &Path,
        stages: &[f64],
        duration: f64,
    ) -> Result<()> {
        let parent = read_content(input).unwrap_or_default();
        let stages_str = stages
            .iter()
            .map(|s| format!("{:.3}", s))
            .collect::<Vec<_>>()
            .join(",");
        self.log(format!(
            "fit in={} out={} dur={:.3} stages={}",
            file_name(input),
            file_name(out),
            duration,
            stages_str
        ));
        self.write_output(
            out,
            format!("fit[{:.3},{}]({})", duration, stages_str, parent),
            Some(duration),
        )
    }

    fn make_silence(&self, out: &Path, seconds: f64) -> Result<()> {
        self.log(format!("silence out={} secs={:.3}", file_name(out), seconds));
        self.write_output(out, format!("silence[{:.3}]", seconds), Some(seconds))
    }

    fn mux_audio_into_video(
        &self,
        video: &Path,
        audio: &Path,
        out: &Path,
        mode: MuxMode,
    ) -> Result<()> {
        let v = read_content(video).unwrap_or_default();
        let a = read_content(audio).unwrap_or_default();
        let (mode_str, duration) = match mode {
            MuxMode::CopyTrimmed(d) => (format!("trim({:.3})", d), Some(d)),
            MuxMode::CopyLoudnorm => ("loudnorm".to_string(), self.lookup_duration(audio)),
        };
        self.log(format!(
            "mux v={} a={} out={} mode={}",
            file_name(video),
            file_name(audio),
            file_name(out),
            mode_str
        ));
        self.write_output(out, format!("mux[{}]({},{})", mode_str, v, a), duration)
    }

    fn encode_mp3(&self, input: &Path, out: &Path, loudnorm: bool) -> Result<()> {
        let parent = read_content(input).unwrap_or_default();
        let duration = self.lookup_duration(input);
        self.log(format!(
            "mp3 in={} out={} loudnorm={}",
            file_name(input),
            file_name(out),
            loudnorm
        ));
        self.write_output(out, format!("mp3[{}]({})", loudnorm, parent), duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("namecast_fake_{}_{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_duration_propagates_through_edits() {
        let dir = temp_dir("durations");
        let engine = FakeEngine::new();
        let base = dir.join("base.wav");
        fs::write(&base, "BASE").unwrap();
        engine.script_duration("base.wav", 5.0);

        let tail = dir.join("tail.wav");
        engine.extract_clip(&base, &tail, 0.4, None).unwrap();
        assert!((engine.probe_duration(&tail).unwrap() - 4.6).abs() < 1e-9);

        let gap = dir.join("gap.wav");
        engine.make_silence(&gap, 0.12).unwrap();

        let merged = dir.join("merged.wav");
        engine
            .concat_clips(&[tail.clone(), gap.clone()], &merged)
            .unwrap();
        assert!((engine.probe_duration(&merged).unwrap() - 4.72).abs() < 1e-9);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_silence_report_queue_repeats_last() {
        let dir = temp_dir("silence");
        let engine = FakeEngine::new();
        let f = dir.join("batch.wav");
        fs::write(&f, "B").unwrap();
        engine.script_silence("batch.wav", "first");
        engine.script_silence("batch.wav", "second");

        assert_eq!(engine.detect_silence(&f, -40.0, 0.18).unwrap(), "first");
        assert_eq!(engine.detect_silence(&f, -35.0, 0.12).unwrap(), "second");
        assert_eq!(engine.detect_silence(&f, -30.0, 0.09).unwrap(), "second");
        assert_eq!(engine.op_count("silencedetect"), 3);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unscripted_inputs_error() {
        let dir = temp_dir("unscripted");
        let engine = FakeEngine::new();
        let f = dir.join("mystery.wav");
        fs::write(&f, "?").unwrap();

        assert!(engine.probe_duration(&f).is_err());
        assert!(engine.detect_silence(&f, -30.0, 0.3).is_err());
        assert_eq!(engine.measure_mean_volume(&f, None).unwrap(), None);

        fs::remove_dir_all(&dir).ok();
    }
}
