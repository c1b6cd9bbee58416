//! Core data types that flow through the indexing pipeline.
//!
//! A [`Source`] is produced by the enumerator, consumed once by the extractor
//! and dropped. An [`IndexEntry`] is built from it, serialized immediately and
//! never mutated.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vpath::{extension_of, VirtualPath};

/// Closed set of formats the extractor understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DocFormat {
    PlainText,
    MarkupText,
    TabularText,
    Pdf,
    LegacyDoc,
    WordDocument,
    Spreadsheet,
    LegacySpreadsheet,
    Presentation,
    Image,
}

impl DocFormat {
    pub const ALL: [DocFormat; 10] = [
        DocFormat::PlainText,
        DocFormat::MarkupText,
        DocFormat::TabularText,
        DocFormat::Pdf,
        DocFormat::LegacyDoc,
        DocFormat::WordDocument,
        DocFormat::Spreadsheet,
        DocFormat::LegacySpreadsheet,
        DocFormat::Presentation,
        DocFormat::Image,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        let format = match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" => DocFormat::PlainText,
            "md" | "markdown" | "html" | "htm" | "xml" | "rtf" => DocFormat::MarkupText,
            "csv" | "tsv" => DocFormat::TabularText,
            "pdf" => DocFormat::Pdf,
            "doc" => DocFormat::LegacyDoc,
            "docx" | "docm" => DocFormat::WordDocument,
            "xlsx" | "xlsm" => DocFormat::Spreadsheet,
            "xls" => DocFormat::LegacySpreadsheet,
            "pptx" => DocFormat::Presentation,
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" => DocFormat::Image,
            _ => return None,
        };
        Some(format)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        extension_of(name).and_then(|ext| Self::from_extension(&ext))
    }

    /// Short tag written into the artifact's metadata line.
    pub fn tag(self) -> &'static str {
        match self {
            DocFormat::PlainText => "TXT",
            DocFormat::MarkupText => "MARKUP",
            DocFormat::TabularText => "CSV",
            DocFormat::Pdf => "PDF",
            DocFormat::LegacyDoc => "DOC",
            DocFormat::WordDocument => "DOCX",
            DocFormat::Spreadsheet => "XLSX",
            DocFormat::LegacySpreadsheet => "XLS",
            DocFormat::Presentation => "PPTX",
            DocFormat::Image => "IMAGE",
        }
    }

    /// Extension used when content of this format has to be written to disk.
    pub fn primary_extension(self) -> &'static str {
        match self {
            DocFormat::PlainText => "txt",
            DocFormat::MarkupText => "md",
            DocFormat::TabularText => "csv",
            DocFormat::Pdf => "pdf",
            DocFormat::LegacyDoc => "doc",
            DocFormat::WordDocument => "docx",
            DocFormat::Spreadsheet => "xlsx",
            DocFormat::LegacySpreadsheet => "xls",
            DocFormat::Presentation => "pptx",
            DocFormat::Image => "png",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    /// Cost tier of a regular (non-archived) file of this format.
    pub fn tier(self) -> CostTier {
        match self {
            DocFormat::PlainText | DocFormat::MarkupText | DocFormat::TabularText => {
                CostTier::PlainText
            }
            DocFormat::LegacyDoc
            | DocFormat::WordDocument
            | DocFormat::Spreadsheet
            | DocFormat::LegacySpreadsheet
            | DocFormat::Presentation => CostTier::Office,
            DocFormat::Pdf | DocFormat::Image => CostTier::Pdf,
        }
    }
}

impl fmt::Display for DocFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Processing tiers, cheapest first. Ordering drives prioritization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    PlainText,
    Office,
    Pdf,
    Archived,
}

impl CostTier {
    pub fn name(self) -> &'static str {
        match self {
            CostTier::PlainText => "plain_text",
            CostTier::Office => "office",
            CostTier::Pdf => "pdf",
            CostTier::Archived => "archived",
        }
    }
}

/// One candidate document, possibly materialized from an archive.
#[derive(Clone, Debug)]
pub struct Source {
    /// Root-relative label, or the encoded virtual path for archive members.
    pub label: VirtualPath,
    /// Real file to read: the file itself, or a scratch temp file.
    pub content_location: PathBuf,
    /// Label of the on-disk file this source came from.
    pub origin_label: String,
    /// Directory depth of the origin file below the root.
    pub depth: usize,
    pub format: DocFormat,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Set by the enumerator when the file exceeds `max_file_bytes`.
    pub oversized: bool,
}

impl Source {
    pub fn tier(&self) -> CostTier {
        if self.label.is_virtual() {
            CostTier::Archived
        } else {
            self.format.tier()
        }
    }

    /// What the artifact's SOURCE line shows: the real path for files on
    /// disk, the virtual path for archive members.
    pub fn source_uri(&self) -> String {
        if self.label.is_virtual() {
            self.label.encode()
        } else {
            self.content_location.display().to_string()
        }
    }
}

/// One serialized document in the canonical artifact.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexEntry {
    pub label: String,
    pub format: DocFormat,
    pub char_len: usize,
    pub modified: DateTime<Utc>,
    pub ocr_used: bool,
    pub quality: u8,
    pub source_uri: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        assert_eq!(DocFormat::from_name("A.PDF"), Some(DocFormat::Pdf));
        assert_eq!(DocFormat::from_name("x/y.Docx"), Some(DocFormat::WordDocument));
        assert_eq!(DocFormat::from_name("x.zip"), None);
        assert_eq!(DocFormat::from_name("Makefile"), None);
    }

    #[test]
    fn tags_round_trip() {
        for format in DocFormat::ALL {
            assert_eq!(DocFormat::from_tag(format.tag()), Some(format));
        }
    }

    #[test]
    fn tiers_are_ordered_cheapest_first() {
        assert!(CostTier::PlainText < CostTier::Office);
        assert!(CostTier::Office < CostTier::Pdf);
        assert!(CostTier::Pdf < CostTier::Archived);
        assert_eq!(DocFormat::LegacySpreadsheet.tier(), CostTier::Office);
        assert_eq!(DocFormat::Image.tier(), CostTier::Pdf);
    }
}
