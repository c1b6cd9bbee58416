//! Typed errors for the indexing engine.
//!
//! Only [`RunError`] ever reaches a caller of [`Engine::start_run`](crate::engine::Engine::start_run).
//! The other types are recovered at their boundary: extraction failures turn
//! into empty text, archive failures into zero entries.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single extraction strategy. Never escapes the extractor.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("text decoding failed: {0}")]
    Decode(String),
    #[error("strategy panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

/// Failure opening or reading an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Bad signature, truncated central directory, unreadable member table.
    #[error("corrupted archive {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },
    /// No opener for this container, or the external tool is missing.
    #[error("unsupported archive {path}: {reason}")]
    Unsupported { path: PathBuf, reason: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of an external helper process (OCR, antiword, unrar).
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("`{program}` is not installed or not on PATH")]
    NotFound { program: String },
    #[error("`{program}` timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("I/O error running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR is disabled")]
    Disabled,
    #[error("no pages were rasterized from {0}")]
    NoPages(PathBuf),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure that aborts a whole indexing run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("root directory does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("run cancelled after {processed} of {total} sources")]
    Cancelled { processed: u64, total: u64 },
    #[error("failed to write scratch index {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to replace canonical index {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("extraction of {label} failed: {reason}")]
    Extraction { label: String, reason: String },
}
