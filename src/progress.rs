//! Run progress: a persisted status snapshot plus optional live reporting.
//!
//! The [`ProgressTracker`] owned by a run is the only writer. Every update
//! rewrites the whole [`ProgressStatus`] as JSON through a temp file and an
//! atomic rename, so a poller calling [`read_progress`] never sees a torn
//! snapshot. Live output goes to **stderr** so stdout stays parseable.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CostTier, DocFormat};
use crate::ocr::OcrObserver;

/// Lifecycle of a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Error | RunState::Cancelled)
    }

    pub fn name(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Error => "error",
            RunState::Cancelled => "cancelled",
        }
    }
}

/// Phase of a running index pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Walking the tree and expanding archives. Total unknown.
    Discovering,
    /// Extracting text, counts known.
    Extracting,
    /// Replacing the canonical artifact.
    Committing,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Discovering => "discovering",
            Phase::Extracting => "extracting",
            Phase::Committing => "committing",
        }
    }
}

/// Timing for one cost tier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTiming {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub total: u64,
    pub processed: u64,
}

/// Snapshot persisted to the progress file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatus {
    pub status: RunState,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub current_format: Option<String>,
    #[serde(default)]
    pub ocr_active: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryTiming>,
}

impl ProgressStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Reads a snapshot written by a tracker. A missing file means no run yet.
pub fn read_progress(path: &Path) -> Result<ProgressStatus> {
    if !path.exists() {
        return Ok(ProgressStatus::idle());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read progress file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse progress file: {}", path.display()))
}

/// Live progress sink, notified after every persisted update.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, status: &ProgressStatus);
}

/// Human-friendly progress on stderr: "index docs  extracting  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, status: &ProgressStatus) {
        let root = status
            .root
            .as_ref()
            .map(|r| r.display().to_string())
            .unwrap_or_default();
        let line = match (status.status, status.phase) {
            (RunState::Running, Some(Phase::Discovering)) => {
                format!("index {}  discovering...\n", root)
            }
            (RunState::Running, Some(Phase::Extracting)) => {
                let ocr = if status.ocr_active { "  [ocr]" } else { "" };
                format!(
                    "index {}  extracting  {} / {} files  {}{}\n",
                    root,
                    format_number(status.processed),
                    format_number(status.total),
                    status.current_file.as_deref().unwrap_or(""),
                    ocr
                )
            }
            (RunState::Running, Some(Phase::Committing)) => {
                format!("index {}  committing...\n", root)
            }
            (RunState::Error, _) => format!(
                "index {}  error: {}\n",
                root,
                status.error.as_deref().unwrap_or("unknown")
            ),
            (state, _) if state.is_terminal() => format!("index {}  {}\n", root, state.name()),
            _ => return,
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, status: &ProgressStatus) {
        let obj = serde_json::json!({
            "event": "progress",
            "status": status.status,
            "phase": status.phase,
            "n": status.processed,
            "total": status.total,
            "current_file": status.current_file,
            "ocr_active": status.ocr_active,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _status: &ProgressStatus) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Single writer of the progress file for one engine.
pub struct ProgressTracker {
    path: PathBuf,
    status: ProgressStatus,
    reporter: Box<dyn ProgressReporter>,
}

impl ProgressTracker {
    pub fn new(path: PathBuf, reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            path,
            status: ProgressStatus::idle(),
            reporter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> &ProgressStatus {
        &self.status
    }

    /// Gives the reporter back so the next run can reuse it.
    pub fn into_reporter(self) -> Box<dyn ProgressReporter> {
        self.reporter
    }

    /// Enters `running` with a fresh snapshot. Refused while already running.
    pub fn start(&mut self, root: &Path) -> bool {
        if self.status.status == RunState::Running {
            tracing::warn!("progress start ignored: a run is already in progress");
            return false;
        }
        let now = Utc::now();
        self.status = ProgressStatus {
            status: RunState::Running,
            phase: Some(Phase::Discovering),
            root: Some(root.to_path_buf()),
            started_at: Some(now),
            ..ProgressStatus::idle()
        };
        self.persist();
        true
    }

    fn running(&self, what: &str) -> bool {
        if self.status.status != RunState::Running {
            tracing::warn!(state = ?self.status.status, "progress {} ignored outside a run", what);
            return false;
        }
        true
    }

    pub fn set_phase(&mut self, phase: Phase) {
        if !self.running("phase change") {
            return;
        }
        tracing::debug!(phase = phase.name(), "index phase");
        self.status.phase = Some(phase);
        if phase != Phase::Extracting {
            self.status.current_file = None;
            self.status.current_format = None;
        }
        self.persist();
    }

    pub fn set_total(&mut self, total: u64) {
        if !self.running("total") {
            return;
        }
        self.status.total = total;
        self.persist();
    }

    pub fn begin_category(&mut self, tier: CostTier, total: u64) {
        if !self.running("category start") {
            return;
        }
        self.status.categories.insert(
            tier.name().to_string(),
            CategoryTiming {
                started_at: Some(Utc::now()),
                total,
                ..CategoryTiming::default()
            },
        );
        self.persist();
    }

    pub fn finish_category(&mut self, tier: CostTier) {
        if !self.running("category finish") {
            return;
        }
        if let Some(timing) = self.status.categories.get_mut(tier.name()) {
            let now = Utc::now();
            timing.completed_at = Some(now);
            timing.duration_ms = timing
                .started_at
                .map(|start| (now - start).num_milliseconds().max(0) as u64);
        }
        self.persist();
    }

    pub fn begin_source(&mut self, label: &str, format: DocFormat) {
        if !self.running("source start") {
            return;
        }
        self.status.current_file = Some(label.to_string());
        self.status.current_format = Some(format.tag().to_string());
        self.persist();
    }

    pub fn source_done(&mut self, tier: CostTier) {
        if !self.running("source finish") {
            return;
        }
        self.status.processed += 1;
        if let Some(timing) = self.status.categories.get_mut(tier.name()) {
            timing.processed += 1;
        }
        self.persist();
    }

    pub fn complete(&mut self, artifact: &Path) {
        if self.finish(RunState::Completed) {
            self.status.artifact = Some(artifact.to_path_buf());
            self.persist();
        }
    }

    pub fn fail(&mut self, message: &str) {
        if self.finish(RunState::Error) {
            self.status.error = Some(message.to_string());
            self.persist();
        }
    }

    pub fn cancel(&mut self) {
        if self.finish(RunState::Cancelled) {
            self.persist();
        }
    }

    fn finish(&mut self, state: RunState) -> bool {
        if !self.running("terminal transition") {
            return false;
        }
        self.status.status = state;
        self.status.phase = None;
        self.status.current_file = None;
        self.status.current_format = None;
        self.status.ocr_active = false;
        true
    }

    fn set_ocr_active(&mut self, active: bool) {
        if self.status.status != RunState::Running || self.status.ocr_active == active {
            return;
        }
        self.status.ocr_active = active;
        self.persist();
    }

    /// Writes the snapshot atomically. Failures are logged, never fatal.
    fn persist(&mut self) {
        self.status.updated_at = Some(Utc::now());
        if let Err(e) = write_snapshot(&self.path, &self.status) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write progress");
        }
        self.reporter.report(&self.status);
    }
}

impl OcrObserver for ProgressTracker {
    fn ocr_started(&mut self) {
        self.set_ocr_active(true);
    }

    fn ocr_finished(&mut self) {
        self.set_ocr_active(false);
    }
}

fn write_snapshot(path: &Path, status: &ProgressStatus) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".docsift-progress-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, status)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace progress file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    struct Recorder(Arc<Mutex<Vec<ProgressStatus>>>);

    impl ProgressReporter for Recorder {
        fn report(&self, status: &ProgressStatus) {
            self.0.lock().unwrap().push(status.clone());
        }
    }

    fn tracker(dir: &Path) -> (ProgressTracker, Arc<Mutex<Vec<ProgressStatus>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tracker = ProgressTracker::new(
            dir.join("progress.json"),
            Box::new(Recorder(seen.clone())),
        );
        (tracker, seen)
    }

    #[test]
    fn missing_file_reads_as_idle() {
        let dir = tempfile::tempdir().unwrap();
        let status = read_progress(&dir.path().join("none.json")).unwrap();
        assert_eq!(status.status, RunState::Idle);
        assert_eq!(status.processed, 0);
    }

    #[test]
    fn full_lifecycle_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, _) = tracker(dir.path());
        assert!(t.start(dir.path()));
        t.set_phase(Phase::Extracting);
        t.set_total(2);
        t.begin_category(CostTier::PlainText, 2);
        t.begin_source("a.txt", DocFormat::PlainText);

        let mid = read_progress(t.path()).unwrap();
        assert_eq!(mid.status, RunState::Running);
        assert_eq!(mid.phase, Some(Phase::Extracting));
        assert_eq!(mid.current_file.as_deref(), Some("a.txt"));
        assert_eq!(mid.current_format.as_deref(), Some("TXT"));

        t.source_done(CostTier::PlainText);
        t.source_done(CostTier::PlainText);
        t.finish_category(CostTier::PlainText);
        t.complete(&dir.path().join("index.txt"));

        let done = read_progress(t.path()).unwrap();
        assert_eq!(done.status, RunState::Completed);
        assert_eq!(done.processed, 2);
        assert_eq!(done.percent(), 100.0);
        let timing = &done.categories["plain_text"];
        assert_eq!((timing.total, timing.processed), (2, 2));
        assert!(timing.completed_at.is_some());
        assert!(timing.duration_ms.is_some());
        assert_eq!(done.artifact, Some(dir.path().join("index.txt")));
    }

    #[test]
    fn out_of_order_transitions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, _) = tracker(dir.path());
        t.complete(dir.path());
        assert_eq!(t.status().status, RunState::Idle);

        assert!(t.start(dir.path()));
        assert!(!t.start(dir.path()));
        t.fail("boom");
        assert_eq!(t.status().status, RunState::Error);
        t.cancel();
        t.source_done(CostTier::Pdf);
        assert_eq!(t.status().status, RunState::Error);
        assert_eq!(t.status().error.as_deref(), Some("boom"));
        assert_eq!(t.status().processed, 0);

        // A terminal state leaves only through a fresh start.
        assert!(t.start(dir.path()));
        assert_eq!(t.status().error, None);
    }

    #[test]
    fn processed_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, seen) = tracker(dir.path());
        t.start(dir.path());
        t.set_total(3);
        t.source_done(CostTier::PlainText);
        t.source_done(CostTier::Office);
        t.cancel();
        t.source_done(CostTier::Office);
        assert_eq!(t.status().processed, 2);

        let history = seen.lock().unwrap();
        let counts: Vec<u64> = history.iter().map(|s| s.processed).collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
    }

    #[test]
    fn ocr_flag_tracks_observer_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (mut t, _) = tracker(dir.path());
        t.start(dir.path());
        t.ocr_started();
        assert!(read_progress(t.path()).unwrap().ocr_active);
        t.ocr_finished();
        assert!(!read_progress(t.path()).unwrap().ocr_active);
    }

    #[test]
    fn status_json_uses_lowercase_names() {
        let status = ProgressStatus {
            status: RunState::Cancelled,
            phase: Some(Phase::Committing),
            ..ProgressStatus::idle()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "cancelled");
        assert_eq!(json["phase"], "committing");
    }
}
