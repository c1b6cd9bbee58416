//! Archive expansion into virtual sources.
//!
//! Archives are never indexed themselves. Their members are materialized into
//! scratch files and surfaced as [`Source`] values addressed by a
//! [`VirtualPath`]. Every scratch file is owned by the run's [`TempRegistry`]
//! and removed in one pass once the run has committed or aborted.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tempfile::TempPath;
use zip::ZipArchive;

use crate::command::run_with_timeout;
use crate::error::{ArchiveError, CommandError};
use crate::models::{DocFormat, Source};
use crate::source_fs::is_lock_file;
use crate::vpath::{extension_of, ArchiveKind, VirtualPath};

/// One file read out of an archive.
#[derive(Clone, Debug)]
pub struct ArchiveMember {
    /// Path of the member inside its archive, `/`-separated.
    pub inner_path: String,
    pub bytes: Vec<u8>,
    pub modified: Option<DateTime<Utc>>,
}

/// Streaming sequence of members. A per-member `Err` skips that member only.
pub type Members = Box<dyn Iterator<Item = Result<ArchiveMember, ArchiveError>>>;

/// Opens one kind of archive container.
pub trait ArchiveOpener: Send + Sync {
    fn kind(&self) -> ArchiveKind;

    fn open(&self, path: &Path) -> Result<Members, ArchiveError>;
}

/// Whether a member name is worth materializing.
fn is_wanted_member(inner_path: &str) -> bool {
    if inner_path.ends_with('/') {
        return false;
    }
    let file_name = inner_path.rsplit('/').next().unwrap_or(inner_path);
    if is_lock_file(file_name) {
        return false;
    }
    DocFormat::from_name(file_name).is_some() || ArchiveKind::from_name(file_name).is_some()
}

// ── zip ─────────────────────────────────────────────────────────────────

pub struct ZipOpener {
    max_member_bytes: u64,
}

impl ZipOpener {
    pub fn new(max_member_bytes: u64) -> Self {
        Self { max_member_bytes }
    }
}

impl ArchiveOpener for ZipOpener {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    fn open(&self, path: &Path) -> Result<Members, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let archive = ZipArchive::new(file).map_err(|e| ArchiveError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(ZipMembers {
            archive,
            next: 0,
            path: path.to_path_buf(),
            max_member_bytes: self.max_member_bytes,
        }))
    }
}

struct ZipMembers {
    archive: ZipArchive<File>,
    next: usize,
    path: PathBuf,
    max_member_bytes: u64,
}

impl ZipMembers {
    fn corrupted(&self, reason: impl ToString) -> ArchiveError {
        ArchiveError::Corrupted {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Iterator for ZipMembers {
    type Item = Result<ArchiveMember, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.archive.len() {
            let index = self.next;
            self.next += 1;
            let max_member_bytes = self.max_member_bytes;

            let read = match self.archive.by_index(index) {
                Ok(mut entry) => {
                    let inner_path = entry.name().replace('\\', "/");
                    if entry.is_dir() || !is_wanted_member(&inner_path) {
                        continue;
                    }
                    if entry.size() > max_member_bytes {
                        tracing::warn!(
                            member = %inner_path,
                            size = entry.size(),
                            "archive member exceeds max_member_bytes, skipping"
                        );
                        continue;
                    }
                    let modified = entry.last_modified().and_then(zip_datetime);
                    let mut bytes = Vec::with_capacity(entry.size() as usize);
                    match (&mut entry).take(max_member_bytes).read_to_end(&mut bytes) {
                        Ok(_) => Ok(ArchiveMember {
                            inner_path,
                            bytes,
                            modified,
                        }),
                        Err(e) => Err(format!("{inner_path}: {e}")),
                    }
                }
                Err(e) => Err(e.to_string()),
            };
            return Some(read.map_err(|reason| self.corrupted(reason)));
        }
        None
    }
}

/// Zip timestamps carry no zone; they are taken as UTC.
fn zip_datetime(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)
        .map(|naive| naive.and_utc())
}

// ── rar ─────────────────────────────────────────────────────────────────

/// RAR support through the external `unrar` tool.
pub struct RarOpener {
    timeout: Duration,
    max_member_bytes: u64,
}

impl RarOpener {
    pub fn new(timeout: Duration, max_member_bytes: u64) -> Self {
        Self {
            timeout,
            max_member_bytes,
        }
    }
}

fn command_to_archive_error(path: &Path, err: CommandError) -> ArchiveError {
    match err {
        CommandError::NotFound { .. } => ArchiveError::Unsupported {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
        other => ArchiveError::Corrupted {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

impl ArchiveOpener for RarOpener {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Rar
    }

    fn open(&self, path: &Path) -> Result<Members, ArchiveError> {
        let mut list = Command::new("unrar");
        list.arg("lb").arg(path);
        let listing =
            run_with_timeout(list, self.timeout).map_err(|e| command_to_archive_error(path, e))?;

        let names: Vec<String> = String::from_utf8_lossy(&listing)
            .lines()
            .map(|l| l.trim().replace('\\', "/"))
            .filter(|l| !l.is_empty() && is_wanted_member(l))
            .collect();

        let path = path.to_path_buf();
        let timeout = self.timeout;
        let max_member_bytes = self.max_member_bytes;
        Ok(Box::new(names.into_iter().filter_map(move |name| {
            let mut print = Command::new("unrar");
            print.arg("p").arg("-inul").arg(&path).arg(&name);
            match run_with_timeout(print, timeout) {
                Ok(bytes) if bytes.len() as u64 > max_member_bytes => {
                    tracing::warn!(
                        member = %name,
                        size = bytes.len(),
                        "archive member exceeds max_member_bytes, skipping"
                    );
                    None
                }
                Ok(bytes) => Some(Ok(ArchiveMember {
                    inner_path: name,
                    bytes,
                    modified: None,
                })),
                Err(e) => Some(Err(command_to_archive_error(&path, e))),
            }
        })))
    }
}

/// Default openers for every [`ArchiveKind`].
pub fn default_openers(timeout: Duration, max_member_bytes: u64) -> Vec<Box<dyn ArchiveOpener>> {
    vec![
        Box::new(ZipOpener::new(max_member_bytes)),
        Box::new(RarOpener::new(timeout, max_member_bytes)),
    ]
}

// ── temp files ──────────────────────────────────────────────────────────

/// Run-scoped owner of materialized archive members.
#[derive(Default)]
pub struct TempRegistry {
    paths: Vec<TempPath>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `bytes` to a fresh temp file and tracks it.
    pub fn materialize(&mut self, bytes: &[u8], extension: Option<&str>) -> std::io::Result<PathBuf> {
        let suffix = extension.map(|e| format!(".{e}")).unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix("docsift-member-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        self.paths.push(temp_path);
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Removes every tracked file. Later calls are no-ops.
    pub fn release(&mut self) {
        let count = self.paths.len();
        for temp_path in self.paths.drain(..) {
            let shown = temp_path.to_path_buf();
            if let Err(e) = temp_path.close() {
                tracing::warn!(path = %shown.display(), error = %e, "failed to remove temp file");
            }
        }
        if count > 0 {
            tracing::debug!(count, "released archive temp files");
        }
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        self.release();
    }
}

// ── expansion ───────────────────────────────────────────────────────────

/// Recursive, depth-bounded archive expansion.
pub struct ArchiveExpander<'a> {
    openers: &'a [Box<dyn ArchiveOpener>],
    archive_depth: usize,
    temps: &'a mut TempRegistry,
}

impl<'a> ArchiveExpander<'a> {
    pub fn new(
        openers: &'a [Box<dyn ArchiveOpener>],
        archive_depth: usize,
        temps: &'a mut TempRegistry,
    ) -> Self {
        Self {
            openers,
            archive_depth,
            temps,
        }
    }

    pub fn archive_depth(&self) -> usize {
        self.archive_depth
    }

    /// Sources found in the archive at `path`.
    ///
    /// `label` addresses the archive itself; top-level archives are expanded
    /// with `current_depth = 1`. `origin_depth` is the directory depth of the
    /// outermost file on disk and `fallback_modified` its mtime.
    pub fn expand(
        &mut self,
        kind: ArchiveKind,
        path: &Path,
        label: &VirtualPath,
        current_depth: usize,
        origin_depth: usize,
        fallback_modified: DateTime<Utc>,
    ) -> Vec<Source> {
        if current_depth > self.archive_depth {
            tracing::debug!(archive = %label, current_depth, "archive depth limit reached");
            return Vec::new();
        }

        let Some(opener) = self.openers.iter().find(|o| o.kind() == kind) else {
            tracing::warn!(archive = %label, kind = kind.scheme(), "no opener for archive kind");
            return Vec::new();
        };

        let members = match opener.open(path) {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(archive = %label, error = %e, "skipping unreadable archive");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for member in members {
            let member = match member {
                Ok(member) => member,
                Err(e) => {
                    tracing::warn!(archive = %label, error = %e, "skipping unreadable archive member");
                    continue;
                }
            };
            let member_label = label.join(&member.inner_path);
            let modified = member.modified.unwrap_or(fallback_modified);
            let extension = extension_of(&member.inner_path);

            if let Some(nested_kind) = ArchiveKind::from_name(&member.inner_path) {
                if current_depth >= self.archive_depth {
                    tracing::debug!(archive = %member_label, "nested archive at depth limit, skipping");
                    continue;
                }
                let nested_path = match self.temps.materialize(&member.bytes, extension.as_deref()) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(archive = %member_label, error = %e, "could not materialize nested archive");
                        continue;
                    }
                };
                out.extend(self.expand(
                    nested_kind,
                    &nested_path,
                    &member_label,
                    current_depth + 1,
                    origin_depth,
                    modified,
                ));
                continue;
            }

            let Some(format) = DocFormat::from_name(&member.inner_path) else {
                continue;
            };
            let content_location = match self.temps.materialize(&member.bytes, extension.as_deref()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(member = %member_label, error = %e, "could not materialize archive member");
                    continue;
                }
            };
            out.push(Source {
                origin_label: member_label.origin_label().to_string(),
                label: member_label,
                content_location,
                depth: origin_depth,
                format,
                size: member.bytes.len() as u64,
                modified,
                oversized: false,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                if name.ends_with('/') {
                    zip.add_directory(*name, zip::write::SimpleFileOptions::default())
                        .unwrap();
                } else {
                    zip.start_file(*name, zip::write::SimpleFileOptions::default())
                        .unwrap();
                    zip.write_all(body).unwrap();
                }
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn openers() -> Vec<Box<dyn ArchiveOpener>> {
        default_openers(Duration::from_secs(5), 1024 * 1024)
    }

    fn expand_file(bytes: &[u8], archive_depth: usize, temps: &mut TempRegistry) -> Vec<Source> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.zip");
        std::fs::write(&path, bytes).unwrap();
        let openers = openers();
        let mut expander = ArchiveExpander::new(&openers, archive_depth, temps);
        expander.expand(
            ArchiveKind::Zip,
            &path,
            &VirtualPath::archive(ArchiveKind::Zip, "c.zip"),
            1,
            0,
            Utc::now(),
        )
    }

    fn labels(sources: &[Source]) -> Vec<String> {
        sources.iter().map(|s| s.label.encode()).collect()
    }

    #[test]
    fn members_become_virtual_sources() {
        let zip = zip_bytes(&[
            ("docs/", b"".as_slice()),
            ("docs/d.txt", b"nested".as_slice()),
            ("~$lock.docx", b"x".as_slice()),
            ("tool.exe", b"MZ".as_slice()),
        ]);
        let mut temps = TempRegistry::new();
        let sources = expand_file(&zip, 2, &mut temps);
        assert_eq!(labels(&sources), ["zip://c.zip!/docs/d.txt"]);
        let src = &sources[0];
        assert_eq!(src.origin_label, "c.zip");
        assert_eq!(src.format, DocFormat::PlainText);
        assert_eq!(std::fs::read(&src.content_location).unwrap(), b"nested");
        assert_eq!(temps.len(), 1);
    }

    #[test]
    fn nested_archive_is_followed_below_limit() {
        let inner = zip_bytes(&[("e.txt", b"deep".as_slice())]);
        let outer = zip_bytes(&[("inner.zip", inner.as_slice()), ("top.txt", b"top".as_slice())]);
        let mut temps = TempRegistry::new();
        let sources = expand_file(&outer, 2, &mut temps);
        assert_eq!(
            labels(&sources),
            ["zip://c.zip!/inner.zip!/e.txt", "zip://c.zip!/top.txt"]
        );
        // inner.zip, e.txt and top.txt
        assert_eq!(temps.len(), 3);
    }

    #[test]
    fn nested_archive_at_limit_yields_nothing() {
        let inner = zip_bytes(&[("e.txt", b"deep".as_slice())]);
        let outer = zip_bytes(&[("inner.zip", inner.as_slice())]);
        let mut temps = TempRegistry::new();
        let sources = expand_file(&outer, 1, &mut temps);
        assert!(sources.is_empty());
        assert!(temps.is_empty());
    }

    #[test]
    fn zero_depth_disables_expansion() {
        let zip = zip_bytes(&[("d.txt", b"nested".as_slice())]);
        let mut temps = TempRegistry::new();
        assert!(expand_file(&zip, 0, &mut temps).is_empty());
    }

    #[test]
    fn corrupted_archive_yields_zero_entries() {
        let mut temps = TempRegistry::new();
        let sources = expand_file(b"PK\x03\x04 this is not really a zip", 2, &mut temps);
        assert!(sources.is_empty());
    }

    #[test]
    fn zip_open_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"garbage").unwrap();
        let err = ZipOpener::new(1024).open(&path).err().unwrap();
        assert!(matches!(err, ArchiveError::Corrupted { .. }));
    }

    #[test]
    fn oversized_members_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.zip");
        std::fs::write(&path, zip_bytes(&[("big.txt", [b'a'; 64].as_slice()), ("small.txt", b"ok".as_slice())])).unwrap();
        let members: Vec<ArchiveMember> = ZipOpener::new(16)
            .open(&path)
            .unwrap()
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].inner_path, "small.txt");
    }

    #[test]
    fn release_removes_files_once() {
        let mut temps = TempRegistry::new();
        let a = temps.materialize(b"a", Some("txt")).unwrap();
        let b = temps.materialize(b"b", None).unwrap();
        assert!(a.exists() && b.exists());
        assert!(a.to_string_lossy().ends_with(".txt"));
        temps.release();
        assert!(!a.exists() && !b.exists());
        assert!(temps.is_empty());
        temps.release();
    }
}
