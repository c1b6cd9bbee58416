//! Filesystem enumeration of candidate documents.
//!
//! [`Sources`] walks the root lazily in lexical order. Archives found on the
//! way are expanded on the spot and their members are spliced into the
//! sequence before the walk continues.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::archive::ArchiveExpander;
use crate::config::IndexConfig;
use crate::models::{DocFormat, Source};
use crate::vpath::{ArchiveKind, VirtualPath};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**"];

/// Office (`~$`) and LibreOffice (`.~lock.`) lock files.
pub fn is_lock_file(file_name: &str) -> bool {
    file_name.starts_with("~$") || file_name.starts_with(".~lock.")
}

/// Names the enumerator must never yield: the artifact, its scratch
/// siblings and the progress file.
#[derive(Clone, Debug)]
pub struct ReservedNames {
    index_stem: String,
    progress_name: Option<String>,
}

impl ReservedNames {
    pub fn new(index_name: &str, progress_path: &Path) -> Self {
        let index_stem = Path::new(index_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| index_name.to_string());
        Self {
            index_stem,
            progress_name: progress_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }

    pub fn is_reserved(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.index_stem)
            || self.progress_name.as_deref() == Some(file_name)
    }
}

/// Lazy sequence of [`Source`] values under a root directory.
pub struct Sources<'a> {
    root: PathBuf,
    walker: walkdir::IntoIter,
    pending: VecDeque<Source>,
    expander: ArchiveExpander<'a>,
    exclude: GlobSet,
    reserved: ReservedNames,
    max_file_bytes: u64,
}

impl<'a> Sources<'a> {
    pub fn new(
        root: &Path,
        max_depth: usize,
        config: &IndexConfig,
        reserved: ReservedNames,
        expander: ArchiveExpander<'a>,
    ) -> Result<Self> {
        if !root.is_dir() {
            bail!("Root directory does not exist: {}", root.display());
        }

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth + 1)
            .follow_links(config.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root: root.to_path_buf(),
            walker,
            pending: VecDeque::new(),
            expander,
            exclude,
            reserved,
            max_file_bytes: config.max_file_bytes,
        })
    }

    /// Handles one directory entry: a source, an expanded archive, or nothing.
    fn visit(&mut self, entry: walkdir::DirEntry) -> Option<Source> {
        if !entry.file_type().is_file() {
            return None;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let label = relative.to_string_lossy().replace('\\', "/");
        let file_name = entry.file_name().to_string_lossy();

        if self.exclude.is_match(&label)
            || is_lock_file(&file_name)
            || self.reserved.is_reserved(&file_name)
        {
            return None;
        }

        let depth = entry.depth().saturating_sub(1);
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat file, skipping");
                return None;
            }
        };
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        if let Some(kind) = ArchiveKind::from_name(&label) {
            if self.expander.archive_depth() == 0 {
                tracing::debug!(archive = %label, "archive expansion disabled");
                return None;
            }
            let archive_label = VirtualPath::archive(kind, label);
            let members = self
                .expander
                .expand(kind, path, &archive_label, 1, depth, modified);
            self.pending.extend(members);
            return None;
        }

        let format = DocFormat::from_name(&label)?;
        let size = metadata.len();
        Some(Source {
            label: VirtualPath::plain(label.clone()),
            content_location: path.to_path_buf(),
            origin_label: label,
            depth,
            format,
            size,
            modified,
            oversized: size > self.max_file_bytes,
        })
    }
}

impl Iterator for Sources<'_> {
    type Item = Source;

    fn next(&mut self) -> Option<Source> {
        loop {
            if let Some(source) = self.pending.pop_front() {
                return Some(source);
            }
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if let Some(source) = self.visit(entry) {
                return Some(source);
            }
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{default_openers, TempRegistry};
    use std::io::Write;
    use std::time::Duration;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn collect(root: &Path, max_depth: usize, config: &IndexConfig) -> Vec<String> {
        let openers = default_openers(Duration::from_secs(5), config.max_member_bytes);
        let mut temps = TempRegistry::new();
        let expander = ArchiveExpander::new(&openers, config.archive_depth, &mut temps);
        let reserved = ReservedNames::new(&config.index_name, &root.join("_docsift_progress.json"));
        Sources::new(root, max_depth, config, reserved, expander)
            .unwrap()
            .map(|s| s.label.encode())
            .collect()
    }

    #[test]
    fn skips_lock_reserved_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.txt", b"hello");
        write(root, "~$a.docx", b"lock");
        write(root, ".~lock.b.xlsx#", b"lock");
        write(root, "_docsift_index.txt", b"old");
        write(root, "_docsift_index.txt.123.partial", b"scratch");
        write(root, "_docsift_progress.json", b"{}");
        write(root, "tool.exe", b"MZ");
        write(root, ".git/objects/x.txt", b"obj");
        let labels = collect(root, 8, &IndexConfig::default());
        assert_eq!(labels, ["a.txt"]);
    }

    #[test]
    fn depth_is_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "top.txt", b"0");
        write(root, "one/mid.txt", b"1");
        write(root, "one/two/deep.txt", b"2");
        assert_eq!(collect(root, 0, &IndexConfig::default()), ["top.txt"]);
        assert_eq!(
            collect(root, 1, &IndexConfig::default()),
            ["one/mid.txt", "top.txt"]
        );
    }

    #[test]
    fn archives_are_spliced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.txt", b"hello");
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("d.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"nested").unwrap();
            zip.finish().unwrap();
        }
        write(root, "c.zip", &buf);
        write(root, "e.txt", b"after");
        assert_eq!(
            collect(root, 8, &IndexConfig::default()),
            ["a.txt", "zip://c.zip!/d.txt", "e.txt"]
        );

        let config = IndexConfig {
            archive_depth: 0,
            ..IndexConfig::default()
        };
        assert_eq!(collect(root, 8, &config), ["a.txt", "e.txt"]);
    }

    #[test]
    fn custom_excludes_and_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "keep.txt", b"small");
        write(root, "big.txt", &[b'x'; 32]);
        write(root, "drafts/skip.txt", b"draft");
        let config = IndexConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            max_file_bytes: 16,
            ..IndexConfig::default()
        };
        let openers = default_openers(Duration::from_secs(5), config.max_member_bytes);
        let mut temps = TempRegistry::new();
        let expander = ArchiveExpander::new(&openers, 2, &mut temps);
        let reserved = ReservedNames::new(&config.index_name, &root.join("p.json"));
        let sources: Vec<Source> = Sources::new(root, 8, &config, reserved, expander)
            .unwrap()
            .collect();
        let flags: Vec<(String, bool)> = sources
            .iter()
            .map(|s| (s.label.encode(), s.oversized))
            .collect();
        assert_eq!(
            flags,
            [("big.txt".to_string(), true), ("keep.txt".to_string(), false)]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let openers = default_openers(Duration::from_secs(5), 1024);
        let mut temps = TempRegistry::new();
        let expander = ArchiveExpander::new(&openers, 2, &mut temps);
        let reserved = ReservedNames::new("_docsift_index.txt", &missing.join("p.json"));
        assert!(Sources::new(&missing, 8, &IndexConfig::default(), reserved, expander).is_err());
    }
}
