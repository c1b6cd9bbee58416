//! Entry point for running an index pass.
//!
//! An [`Engine`] bundles the config with its capabilities (extractor,
//! archive openers, progress reporter). Nothing is global: two engines over
//! different roots do not share state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::archive::{default_openers, ArchiveExpander, ArchiveOpener, TempRegistry};
use crate::config::Config;
use crate::error::RunError;
use crate::extract::{prioritize, FormatExtractor, TextExtractor};
use crate::index_writer::{IndexWriter, RunSummary};
use crate::models::Source;
use crate::ocr;
use crate::progress::{read_progress, NoProgress, ProgressReporter, ProgressStatus, ProgressTracker};
use crate::source_fs::{ReservedNames, Sources};

/// Cooperative cancellation flag, checked between sources.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Engine {
    config: Config,
    extractor: Box<dyn TextExtractor>,
    openers: Vec<Box<dyn ArchiveOpener>>,
    reporter: Option<Box<dyn ProgressReporter>>,
    cancel: CancelToken,
    last_progress_path: Option<PathBuf>,
}

impl Engine {
    /// Engine with the default extractor, OCR engine and archive openers.
    pub fn new(config: Config) -> Self {
        let timeout = Duration::from_secs(config.extract.external_timeout_secs);
        let ocr = ocr::from_config(&config.ocr, timeout);
        let extractor = Box::new(FormatExtractor::new(&config, ocr));
        let openers = default_openers(timeout, config.index.max_member_bytes);
        Self {
            config,
            extractor,
            openers,
            reporter: None,
            cancel: CancelToken::new(),
            last_progress_path: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_openers(mut self, openers: Vec<Box<dyn ArchiveOpener>>) -> Self {
        self.openers = openers;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle that cancels the current run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Indexes `root` and returns the path of the committed artifact.
    ///
    /// Blocks until the run ends. A failed or cancelled run leaves any
    /// previous artifact untouched.
    pub fn start_run(&mut self, root: &Path, max_depth: usize, archive_depth: usize) -> Result<PathBuf> {
        self.run(root, max_depth, archive_depth)
            .map(|(artifact, _)| artifact)
    }

    /// Like [`start_run`](Self::start_run), also returning the run summary.
    pub fn run(
        &mut self,
        root: &Path,
        max_depth: usize,
        archive_depth: usize,
    ) -> Result<(PathBuf, RunSummary)> {
        if root.is_dir() {
            let output_dir = self.config.output_dir(root);
            if let Err(e) = std::fs::create_dir_all(&output_dir) {
                tracing::warn!(dir = %output_dir.display(), error = %e, "cannot create output directory");
            }
        }
        let artifact_path = self.config.artifact_path(root);
        let progress_path = self.config.progress_path(root);
        self.last_progress_path = Some(progress_path.clone());

        let reporter = self.reporter.take().unwrap_or_else(|| Box::new(NoProgress));
        let mut tracker = ProgressTracker::new(progress_path.clone(), reporter);
        tracker.start(root);
        tracing::info!(
            root = %root.display(),
            max_depth,
            archive_depth,
            "index run started"
        );

        let mut temps = TempRegistry::new();
        let sources = match self.discover(root, max_depth, archive_depth, &progress_path, &mut temps) {
            Ok(sources) => sources,
            Err(e) => {
                tracker.fail(&format!("{e:#}"));
                temps.release();
                self.reporter = Some(tracker.into_reporter());
                return Err(e);
            }
        };
        tracing::info!(sources = sources.len(), temp_files = temps.len(), "discovery finished");

        let writer = IndexWriter::new(artifact_path, self.extractor.as_ref(), &self.cancel);
        let result = writer.run(sources, &mut tracker, &mut temps);
        self.reporter = Some(tracker.into_reporter());
        self.cancel.reset();
        Ok(result?)
    }

    fn discover(
        &self,
        root: &Path,
        max_depth: usize,
        archive_depth: usize,
        progress_path: &Path,
        temps: &mut TempRegistry,
    ) -> Result<Vec<Source>> {
        if !root.is_dir() {
            return Err(RunError::MissingRoot(root.to_path_buf()).into());
        }
        let reserved = ReservedNames::new(&self.config.index.index_name, progress_path);
        let expander = ArchiveExpander::new(&self.openers, archive_depth, temps);
        let mut sources: Vec<Source> =
            Sources::new(root, max_depth, &self.config.index, reserved, expander)
                .with_context(|| format!("Failed to enumerate {}", root.display()))?
                .collect();
        prioritize(&mut sources);
        Ok(sources)
    }

    /// Latest progress snapshot of this engine's most recent run.
    pub fn read_progress(&self) -> Result<ProgressStatus> {
        match &self.last_progress_path {
            Some(path) => read_progress(path),
            None => Ok(ProgressStatus::idle()),
        }
    }
}
