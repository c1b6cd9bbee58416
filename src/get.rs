//! Entry retrieval by label.
//!
//! Looks up one document in the committed artifact, by its exact label or
//! virtual path. Used by `docsift get`.

use std::path::Path;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::search::{load_index, IndexedDocument};

/// Finds the entry labelled `label`.
pub fn get_document(config: &Config, root: &Path, label: &str) -> Result<IndexedDocument> {
    let docs = load_index(&config.artifact_path(root))?;
    find(docs, label)
}

fn find(docs: Vec<IndexedDocument>, label: &str) -> Result<IndexedDocument> {
    match docs.into_iter().find(|d| d.label == label) {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", label),
    }
}

/// CLI entry point: prints one entry's metadata and text to stdout.
pub fn run_get(config: &Config, root: &Path, label: &str) -> Result<()> {
    let doc = get_document(config, root, label)?;

    println!("--- Document ---");
    println!("label:    {}", doc.label);
    println!("format:   {}", doc.format);
    println!("source:   {}", doc.source_uri);
    println!("modified: {}", doc.modified.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("chars:    {}", doc.char_len);
    println!("ocr:      {}", if doc.ocr_used { "yes" } else { "no" });
    println!("quality:  {}%", doc.quality);
    println!();

    println!("--- Text ---");
    println!("{}", doc.body);

    Ok(())
}
