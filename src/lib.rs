//! # docsift
//!
//! A local document indexer for mixed-format archives.
//!
//! docsift walks a directory tree, expands zip/rar archives into virtual
//! entries, extracts text from plain text, markup, PDFs, Office documents
//! and images (with OCR fallback), and writes everything into one plain-text
//! index artifact that can be grepped, searched and diffed. The artifact is
//! replaced atomically: readers see either the previous or the new version.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  source_fs  │──▶│  prioritize  │──▶│   extract    │──▶│ index_writer │
//! │ walk+archive│   │ cheap first │   │ chains + OCR │   │ scratch→commit│
//! └─────────────┘   └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                                              │
//!                                  ┌───────────────────────────┤
//!                                  ▼                           ▼
//!                            ┌──────────┐               ┌────────────┐
//!                            │  search  │               │  progress  │
//!                            │ stats/get│               │  (JSON)    │
//!                            └──────────┘               └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsift index ./archive              # build ./archive/_docsift_index.txt
//! docsift progress --root ./archive    # poll a running index
//! docsift search invoice total --mode all --root ./archive
//! docsift get "zip://2019.zip!/q3/report.docx" --root ./archive
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`vpath`] | Virtual paths into archives |
//! | [`source_fs`] | Filesystem enumeration |
//! | [`archive`] | Archive expansion and temp files |
//! | [`extract`] | Per-format extraction chains |
//! | [`ocr`] | OCR engines |
//! | [`normalize`] | Text cleanup and quality score |
//! | [`progress`] | Persisted run progress |
//! | [`index_writer`] | Artifact format and atomic commit |
//! | [`search`] | Artifact parsing and keyword search |
//! | [`engine`] | Run orchestration |

pub mod archive;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod get;
pub mod index_writer;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod progress;
pub mod search;
pub mod source_fs;
pub mod stats;
pub mod vpath;

pub use engine::{CancelToken, Engine};
pub use error::RunError;
