//! Artifact statistics.
//!
//! Summarizes a committed index: entry counts per format, OCR usage, empty
//! entries and mean quality, plus a SHA-256 digest of the file so two runs
//! can be compared at a glance. Used by `docsift stats`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::models::DocFormat;
use crate::progress::format_number;
use crate::search::{load_index, IndexedDocument};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub virtual_entries: usize,
    pub ocr_used: usize,
    pub empty: usize,
    pub total_chars: usize,
    pub mean_quality: f64,
    pub by_format: BTreeMap<String, usize>,
}

/// Aggregates parsed documents.
pub fn summarize(docs: &[IndexedDocument]) -> IndexStats {
    let mut stats = IndexStats {
        entries: docs.len(),
        ..IndexStats::default()
    };
    let mut quality_sum = 0u64;
    for doc in docs {
        if doc.label.contains("://") {
            stats.virtual_entries += 1;
        }
        if doc.ocr_used {
            stats.ocr_used += 1;
        }
        if doc.char_len == 0 {
            stats.empty += 1;
        }
        stats.total_chars += doc.char_len;
        quality_sum += u64::from(doc.quality);
        *stats
            .by_format
            .entry(doc.format.tag().to_string())
            .or_default() += 1;
    }
    if !docs.is_empty() {
        stats.mean_quality = quality_sum as f64 / docs.len() as f64;
    }
    stats
}

/// Hex SHA-256 of a file.
pub fn file_digest(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Run the stats command: parse the artifact and print a summary.
pub fn run_stats(config: &Config, root: &Path) -> Result<()> {
    let artifact = config.artifact_path(root);
    let docs = load_index(&artifact)?;
    let stats = summarize(&docs);
    let size = std::fs::metadata(&artifact).map(|m| m.len()).unwrap_or(0);

    println!("docsift index stats");
    println!("===================");
    println!();
    println!("  Index:       {}", artifact.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  SHA-256:     {}", file_digest(&artifact)?);
    println!();
    println!("  Entries:     {}", format_number(stats.entries as u64));
    println!("  In archives: {}", format_number(stats.virtual_entries as u64));
    println!("  OCR:         {}", format_number(stats.ocr_used as u64));
    println!("  Empty:       {}", format_number(stats.empty as u64));
    println!("  Characters:  {}", format_number(stats.total_chars as u64));
    println!("  Quality:     {:.1}% mean", stats.mean_quality);

    if !stats.by_format.is_empty() {
        println!();
        println!("  By format:");
        println!("  {:<10} {:>8}", "FORMAT", "ENTRIES");
        println!("  {}", "-".repeat(19));
        for format in DocFormat::ALL {
            if let Some(count) = stats.by_format.get(format.tag()) {
                println!("  {:<10} {:>8}", format.tag(), count);
            }
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexEntry;
    use chrono::Utc;

    fn doc(label: &str, format: DocFormat, body: &str, ocr: bool, quality: u8) -> IndexEntry {
        IndexEntry {
            label: label.to_string(),
            format,
            char_len: body.chars().count(),
            modified: Utc::now(),
            ocr_used: ocr,
            quality,
            source_uri: label.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn summarize_counts() {
        let docs = vec![
            doc("a.txt", DocFormat::PlainText, "hello", false, 100),
            doc("b.pdf", DocFormat::Pdf, "", false, 0),
            doc("zip://c.zip!/d.pdf", DocFormat::Pdf, "scan", true, 50),
        ];
        let stats = summarize(&docs);
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.virtual_entries, 1);
        assert_eq!(stats.ocr_used, 1);
        assert_eq!(stats.empty, 1);
        assert_eq!(stats.total_chars, 9);
        assert_eq!(stats.mean_quality, 50.0);
        assert_eq!(stats.by_format["PDF"], 2);
    }

    #[test]
    fn empty_index_has_zero_mean() {
        assert_eq!(summarize(&[]), IndexStats::default());
    }

    #[test]
    fn digest_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
