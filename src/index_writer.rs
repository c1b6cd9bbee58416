//! Canonical index artifact writer.
//!
//! Drains prioritized sources through the extractor and serializes one
//! entry per source into a scratch file beside the artifact. The scratch
//! file replaces the canonical artifact only after every source succeeded;
//! on any failure it is dropped and the previous artifact stays as it was.
//!
//! Entry grammar:
//!
//! ```text
//! ================================================================================
//! TITLE: <label>
//! META: <FORMAT> | <n> chars | <YYYY-MM-DD HH:MM:SS> | OCR: <yes|no> | quality: <q>%
//! SOURCE: <path or virtual path>
//! ================================================================================
//! <<<BEGIN TEXT>>>
//! <text>
//! <<<END TEXT>>>
//!
//! ```

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use crate::archive::TempRegistry;
use crate::engine::CancelToken;
use crate::error::RunError;
use crate::extract::{Extraction, TextExtractor};
use crate::models::{CostTier, IndexEntry, Source};
use crate::normalize::{normalize_text, quality_score};
use crate::progress::{Phase, ProgressTracker};

pub const SEPARATOR: &str =
    "================================================================================";
pub const BEGIN_TEXT: &str = "<<<BEGIN TEXT>>>";
pub const END_TEXT: &str = "<<<END TEXT>>>";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of a committed run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub entries: u64,
    pub ocr_used: u64,
    /// Entries whose extracted text is empty.
    pub empty: u64,
    pub duration: Duration,
}

fn is_marker(line: &str) -> bool {
    line == SEPARATOR || line == BEGIN_TEXT || line == END_TEXT
}

/// Prefixes a backslash to body lines that would read as grammar lines.
pub fn escape_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if is_marker(line.trim_start_matches('\\')) {
            out.push('\\');
        }
        out.push_str(line);
    }
    out
}

/// Inverse of [`escape_body`] for a single line.
pub fn unescape_line(line: &str) -> &str {
    match line.strip_prefix('\\') {
        Some(rest) if is_marker(rest.trim_start_matches('\\')) => rest,
        _ => line,
    }
}

/// Builds the entry for one source from its raw extraction.
pub fn build_entry(source: &Source, extraction: Extraction) -> IndexEntry {
    let body = normalize_text(&extraction.text);
    IndexEntry {
        label: source.label.encode(),
        format: source.format,
        char_len: body.chars().count(),
        modified: source.modified,
        ocr_used: extraction.ocr_used,
        quality: quality_score(&body),
        source_uri: source.source_uri(),
        body,
    }
}

/// Serializes one entry, including its trailing blank line.
pub fn write_entry<W: Write>(out: &mut W, entry: &IndexEntry) -> std::io::Result<()> {
    writeln!(out, "{}", SEPARATOR)?;
    writeln!(out, "TITLE: {}", single_line(&entry.label))?;
    writeln!(
        out,
        "META: {} | {} chars | {} | OCR: {} | quality: {}%",
        entry.format.tag(),
        entry.char_len,
        entry.modified.format(TIMESTAMP_FORMAT),
        if entry.ocr_used { "yes" } else { "no" },
        entry.quality
    )?;
    writeln!(out, "SOURCE: {}", single_line(&entry.source_uri))?;
    writeln!(out, "{}", SEPARATOR)?;
    writeln!(out, "{}", BEGIN_TEXT)?;
    if !entry.body.is_empty() {
        writeln!(out, "{}", escape_body(&entry.body))?;
    }
    writeln!(out, "{}", END_TEXT)?;
    writeln!(out)?;
    Ok(())
}

fn single_line(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

/// Writes one run's artifact.
pub struct IndexWriter<'a> {
    artifact_path: PathBuf,
    extractor: &'a dyn TextExtractor,
    cancel: &'a CancelToken,
}

impl<'a> IndexWriter<'a> {
    pub fn new(
        artifact_path: PathBuf,
        extractor: &'a dyn TextExtractor,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            artifact_path,
            extractor,
            cancel,
        }
    }

    fn reserved_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Writes and commits the artifact, then releases `temps`.
    ///
    /// Progress ends in `completed`, `cancelled` or `error`. On failure the
    /// canonical artifact is left untouched.
    pub fn run(
        &self,
        sources: Vec<Source>,
        tracker: &mut ProgressTracker,
        temps: &mut TempRegistry,
    ) -> Result<(PathBuf, RunSummary), RunError> {
        let result = self.write_and_commit(sources, tracker);
        match &result {
            Ok(summary) => {
                tracker.complete(&self.artifact_path);
                tracing::info!(
                    artifact = %self.artifact_path.display(),
                    entries = summary.entries,
                    ocr = summary.ocr_used,
                    empty = summary.empty,
                    duration_ms = summary.duration.as_millis() as u64,
                    "index committed"
                );
            }
            Err(RunError::Cancelled { processed, total }) => {
                tracker.cancel();
                tracing::warn!(processed, total, "index run cancelled, artifact unchanged");
            }
            Err(e) => {
                tracker.fail(&e.to_string());
                tracing::error!(error = %e, "index run failed, artifact unchanged");
            }
        }
        temps.release();
        result.map(|summary| (self.artifact_path.clone(), summary))
    }

    fn open_scratch(&self) -> Result<NamedTempFile, RunError> {
        let dir = match self.artifact_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let scratch_err = |source| RunError::Scratch {
            path: dir.clone(),
            source,
        };
        std::fs::create_dir_all(&dir).map_err(scratch_err)?;
        tempfile::Builder::new()
            .prefix(&format!("{}.", self.reserved_name()))
            .suffix(".partial")
            .tempfile_in(&dir)
            .map_err(scratch_err)
    }

    fn write_and_commit(
        &self,
        sources: Vec<Source>,
        tracker: &mut ProgressTracker,
    ) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut scratch = self.open_scratch()?;
        let scratch_path = scratch.path().to_path_buf();
        let scratch_err = |source| RunError::Scratch {
            path: scratch_path.clone(),
            source,
        };

        let total = sources.len() as u64;
        let mut tier_totals: BTreeMap<CostTier, u64> = BTreeMap::new();
        for source in &sources {
            *tier_totals.entry(source.tier()).or_default() += 1;
        }
        tracker.set_phase(Phase::Extracting);
        tracker.set_total(total);

        let reserved = self.reserved_name();
        let mut summary = RunSummary::default();
        let mut processed = 0u64;
        let mut current_tier: Option<CostTier> = None;
        {
            let mut out = BufWriter::new(scratch.as_file_mut());
            for source in sources {
                if self.cancel.is_cancelled() {
                    return Err(RunError::Cancelled { processed, total });
                }

                let tier = source.tier();
                if current_tier != Some(tier) {
                    if let Some(prev) = current_tier {
                        tracker.finish_category(prev);
                    }
                    tracker.begin_category(tier, tier_totals.get(&tier).copied().unwrap_or(0));
                    current_tier = Some(tier);
                }

                let label = source.label.encode();
                if label == reserved {
                    tracing::debug!(label = %label, "skipping reserved artifact name");
                } else {
                    tracker.begin_source(&label, source.format);
                    let extraction = self
                        .extractor
                        .extract(&source, &mut *tracker)
                        .map_err(|e| RunError::Extraction {
                            label: label.clone(),
                            reason: format!("{e:#}"),
                        })?;
                    let entry = build_entry(&source, extraction);
                    tracing::debug!(
                        label = %entry.label,
                        chars = entry.char_len,
                        ocr = entry.ocr_used,
                        "extracted"
                    );
                    write_entry(&mut out, &entry).map_err(scratch_err)?;

                    summary.entries += 1;
                    if entry.ocr_used {
                        summary.ocr_used += 1;
                    }
                    if entry.char_len == 0 {
                        summary.empty += 1;
                    }
                }

                processed += 1;
                tracker.source_done(tier);
            }
            if let Some(prev) = current_tier {
                tracker.finish_category(prev);
            }
            out.flush().map_err(scratch_err)?;
        }

        tracker.set_phase(Phase::Committing);
        scratch.as_file().sync_all().map_err(scratch_err)?;
        scratch
            .persist(&self.artifact_path)
            .map_err(|e| RunError::Commit {
                path: self.artifact_path.clone(),
                source: e.error,
            })?;

        summary.duration = started.elapsed();
        Ok(summary)
    }
}

/// Whether `path` names a scratch file of the artifact called `index_name`.
pub fn is_scratch_file(path: &Path, index_name: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with(index_name) && n.ends_with(".partial"))
}
