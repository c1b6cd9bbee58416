//! Addresses for files nested inside archives.
//!
//! Grammar: `scheme://archiveLabel!/innerPath[!/innerPath...]`, where the
//! scheme names the outermost container. A path without a scheme is an
//! ordinary root-relative label.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between nesting levels.
pub const SEGMENT_SEPARATOR: &str = "!/";
const SCHEME_SEPARATOR: &str = "://";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    Rar,
}

impl ArchiveKind {
    pub fn scheme(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Rar => "rar",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "zip" => Some(ArchiveKind::Zip),
            "rar" => Some(ArchiveKind::Rar),
            _ => None,
        }
    }

    /// Archive kind for a file name, by extension (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match extension_of(name).as_deref() {
            Some("zip") => Some(ArchiveKind::Zip),
            Some("rar") => Some(ArchiveKind::Rar),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum VirtualPathError {
    #[error("empty virtual path")]
    Empty,
    #[error("unknown archive scheme '{0}'")]
    UnknownScheme(String),
    #[error("empty segment in virtual path '{0}'")]
    EmptySegment(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct VirtualPath {
    scheme: Option<ArchiveKind>,
    /// `segments[0]` is the root-relative label of the outermost archive
    /// (or the whole label for plain paths); the rest are inner paths.
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn plain(label: impl Into<String>) -> Self {
        Self {
            scheme: None,
            segments: vec![label.into()],
        }
    }

    /// The address of an archive itself, before descending into it.
    pub fn archive(kind: ArchiveKind, archive_label: impl Into<String>) -> Self {
        Self {
            scheme: Some(kind),
            segments: vec![archive_label.into()],
        }
    }

    /// Appends one nesting level.
    pub fn join(&self, inner_path: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(inner_path.trim_start_matches('/').to_string());
        Self {
            scheme: self.scheme,
            segments,
        }
    }

    pub fn scheme(&self) -> Option<ArchiveKind> {
        self.scheme
    }

    pub fn is_virtual(&self) -> bool {
        self.scheme.is_some() && self.segments.len() > 1
    }

    /// Label of the outermost file on disk.
    pub fn origin_label(&self) -> &str {
        &self.segments[0]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of archive levels crossed to reach this path.
    pub fn nesting(&self) -> usize {
        self.segments.len() - 1
    }

    /// Final path component of the innermost segment.
    pub fn file_name(&self) -> &str {
        let last = self.segments.last().map(String::as_str).unwrap_or("");
        last.rsplit(['/', '\\']).next().unwrap_or(last)
    }

    pub fn extension(&self) -> Option<String> {
        extension_of(self.file_name())
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn parse(s: &str) -> Result<Self, VirtualPathError> {
        if s.is_empty() {
            return Err(VirtualPathError::Empty);
        }
        let Some((scheme, rest)) = s.split_once(SCHEME_SEPARATOR) else {
            return Ok(Self::plain(s));
        };
        let kind = ArchiveKind::from_scheme(scheme)
            .ok_or_else(|| VirtualPathError::UnknownScheme(scheme.to_string()))?;
        let segments: Vec<String> = rest.split(SEGMENT_SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(VirtualPathError::EmptySegment(s.to_string()));
        }
        Ok(Self {
            scheme: Some(kind),
            segments,
        })
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = self.scheme {
            write!(f, "{}{}", kind.scheme(), SCHEME_SEPARATOR)?;
        }
        write!(f, "{}", self.segments.join(SEGMENT_SEPARATOR))
    }
}

impl FromStr for VirtualPath {
    type Err = VirtualPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_encoding() {
        let vp = VirtualPath::archive(ArchiveKind::Zip, "c.zip").join("d.txt");
        assert_eq!(vp.to_string(), "zip://c.zip!/d.txt");
        assert!(vp.is_virtual());
        assert_eq!(vp.origin_label(), "c.zip");
        assert_eq!(vp.file_name(), "d.txt");
        assert_eq!(vp.nesting(), 1);
    }

    #[test]
    fn nested_encoding_keeps_outer_scheme() {
        let vp = VirtualPath::archive(ArchiveKind::Rar, "sub/outer.rar")
            .join("inner.zip")
            .join("docs/report.PDF");
        assert_eq!(vp.to_string(), "rar://sub/outer.rar!/inner.zip!/docs/report.PDF");
        assert_eq!(vp.file_name(), "report.PDF");
        assert_eq!(vp.extension().as_deref(), Some("pdf"));
        assert_eq!(vp.nesting(), 2);
    }

    #[test]
    fn parse_inverts_encode() {
        let raw = "zip://a/b.zip!/c.zip!/d e.txt";
        let vp = VirtualPath::parse(raw).unwrap();
        assert_eq!(vp.scheme(), Some(ArchiveKind::Zip));
        assert_eq!(vp.segments(), ["a/b.zip", "c.zip", "d e.txt"]);
        assert_eq!(vp.encode(), raw);
    }

    #[test]
    fn plain_labels_have_no_scheme() {
        let vp: VirtualPath = "notes/a.txt".parse().unwrap();
        assert_eq!(vp.scheme(), None);
        assert!(!vp.is_virtual());
        assert_eq!(vp.to_string(), "notes/a.txt");
    }

    #[test]
    fn leading_slash_in_member_name_is_dropped() {
        let vp = VirtualPath::archive(ArchiveKind::Zip, "c.zip").join("/abs.txt");
        assert_eq!(vp.to_string(), "zip://c.zip!/abs.txt");
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert_eq!(VirtualPath::parse(""), Err(VirtualPathError::Empty));
        assert!(matches!(
            VirtualPath::parse("tar://x.tar!/y"),
            Err(VirtualPathError::UnknownScheme(_))
        ));
        assert!(matches!(
            VirtualPath::parse("zip://x.zip!/!/y"),
            Err(VirtualPathError::EmptySegment(_))
        ));
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension_of("A.DOCX").as_deref(), Some("docx"));
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("dir.d/README"), None);
        assert_eq!(ArchiveKind::from_name("x/y.Zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_name("y.7z"), None);
    }
}
