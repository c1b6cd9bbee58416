//! Keyword search over a committed index artifact.
//!
//! [`parse_index`] turns the artifact text back into documents and
//! [`search`] ranks them by case-insensitive substring matches. Scratch
//! `.partial` files are never read.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::{Config, SearchConfig};
use crate::index_writer::{is_scratch_file, unescape_line, BEGIN_TEXT, END_TEXT, SEPARATOR, TIMESTAMP_FORMAT};
use crate::models::{DocFormat, IndexEntry};

/// A document read back from the artifact.
pub type IndexedDocument = IndexEntry;

/// Reads and parses the artifact at `path`.
pub fn load_index(path: &Path) -> Result<Vec<IndexedDocument>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.ends_with(".partial") || is_scratch_file(path, &name) {
        bail!("Refusing to read scratch file: {}", path.display());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index: {}", path.display()))?;
    parse_index(&text).with_context(|| format!("Malformed index: {}", path.display()))
}

/// Splits artifact text into documents.
pub fn parse_index(text: &str) -> Result<Vec<IndexedDocument>> {
    let mut docs = Vec::new();
    let mut lines = text.lines().enumerate().peekable();

    loop {
        while lines.peek().is_some_and(|(_, l)| l.is_empty()) {
            lines.next();
        }
        let Some((line_no, first)) = lines.next() else {
            break;
        };
        if first != SEPARATOR {
            bail!("line {}: expected entry separator", line_no + 1);
        }

        let mut header = |key: &str| -> Result<String> {
            match lines.next() {
                Some((_, l)) => match l.strip_prefix(key) {
                    Some(value) => Ok(value.to_string()),
                    None => bail!("line {}: expected {}", line_no + 1, key.trim()),
                },
                None => bail!("unexpected end of index after line {}", line_no + 1),
            }
        };
        let label = header("TITLE: ")?;
        let meta = header("META: ")?;
        let source_uri = header("SOURCE: ")?;
        for expected in [SEPARATOR, BEGIN_TEXT] {
            match lines.next() {
                Some((_, l)) if l == expected => {}
                _ => bail!("entry {}: expected {}", label, expected),
            }
        }

        let mut body_lines: Vec<&str> = Vec::new();
        let mut closed = false;
        for (_, l) in lines.by_ref() {
            if l == END_TEXT {
                closed = true;
                break;
            }
            body_lines.push(unescape_line(l));
        }
        if !closed {
            bail!("entry {}: missing {}", label, END_TEXT);
        }

        let meta = parse_meta(&meta).with_context(|| format!("entry {}", label))?;
        let body = body_lines.join("\n");
        docs.push(IndexEntry {
            label,
            format: meta.format,
            char_len: meta.char_len,
            modified: meta.modified,
            ocr_used: meta.ocr_used,
            quality: meta.quality,
            source_uri,
            body,
        });
    }
    Ok(docs)
}

struct Meta {
    format: DocFormat,
    char_len: usize,
    modified: chrono::DateTime<chrono::Utc>,
    ocr_used: bool,
    quality: u8,
}

fn parse_meta(meta: &str) -> Result<Meta> {
    let fields: Vec<&str> = meta.split(" | ").collect();
    let [tag, chars, date, ocr, quality] = fields.as_slice() else {
        bail!("expected 5 META fields, found {}", fields.len());
    };
    let format = DocFormat::from_tag(tag).with_context(|| format!("unknown format {}", tag))?;
    let char_len = chars
        .strip_suffix(" chars")
        .and_then(|n| n.parse().ok())
        .with_context(|| format!("bad length field {}", chars))?;
    let modified = NaiveDateTime::parse_from_str(date, TIMESTAMP_FORMAT)
        .with_context(|| format!("bad date field {}", date))?
        .and_utc();
    let ocr_used = match *ocr {
        "OCR: yes" => true,
        "OCR: no" => false,
        other => bail!("bad OCR field {}", other),
    };
    let quality = quality
        .strip_prefix("quality: ")
        .and_then(|q| q.strip_suffix('%'))
        .and_then(|q| q.parse().ok())
        .with_context(|| format!("bad quality field {}", quality))?;
    Ok(Meta {
        format,
        char_len,
        modified,
        ocr_used,
        quality,
    })
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SearchMode {
    /// At least one term matches.
    #[default]
    Any,
    /// Every term matches.
    All,
    /// No term matches. Documents without text are left out.
    Exclude,
}

impl std::str::FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(SearchMode::Any),
            "all" => Ok(SearchMode::All),
            "exclude" => Ok(SearchMode::Exclude),
            other => bail!("Unknown search mode: '{}'. Available: any, all, exclude", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub snippet_radius: usize,
    pub max_snippets: usize,
    pub limit: Option<usize>,
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            snippet_radius: config.snippet_radius,
            max_snippets: config.max_snippets,
            limit: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TermCount {
    pub term: String,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SearchHit {
    pub label: String,
    pub format: DocFormat,
    pub source_uri: String,
    pub char_len: usize,
    pub total_matches: usize,
    pub per_term: Vec<TermCount>,
    pub snippets: Vec<String>,
}

/// Body folded to lowercase, remembering each char's byte span in the original.
struct Folded {
    chars: Vec<char>,
    spans: Vec<(usize, usize)>,
}

impl Folded {
    fn new(body: &str) -> Self {
        let mut chars = Vec::with_capacity(body.len());
        let mut spans = Vec::with_capacity(body.len());
        for (i, c) in body.char_indices() {
            let end = i + c.len_utf8();
            for lower in c.to_lowercase() {
                chars.push(lower);
                spans.push((i, end));
            }
        }
        Self { chars, spans }
    }

    /// Non-overlapping byte ranges of `needle` in the original body.
    fn find_all(&self, needle: &[char]) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        if needle.is_empty() || needle.len() > self.chars.len() {
            return out;
        }
        let mut k = 0;
        while k + needle.len() <= self.chars.len() {
            if self.chars[k..k + needle.len()] == *needle {
                out.push((self.spans[k].0, self.spans[k + needle.len() - 1].1));
                k += needle.len();
            } else {
                k += 1;
            }
        }
        out
    }
}

/// Ranks `docs` against `terms`: total matches descending, then label.
pub fn search(
    docs: &[IndexedDocument],
    terms: &[String],
    mode: SearchMode,
    opts: &SearchOptions,
) -> Vec<SearchHit> {
    let needles: Vec<(String, Vec<char>)> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_string(), t.chars().flat_map(char::to_lowercase).collect()))
        .collect();
    if needles.is_empty() && mode != SearchMode::Exclude {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for doc in docs {
        let folded = Folded::new(&doc.body);
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut per_term = Vec::with_capacity(needles.len());
        for (term, needle) in &needles {
            let found = folded.find_all(needle);
            per_term.push(TermCount {
                term: term.clone(),
                count: found.len(),
            });
            ranges.extend(found);
        }
        let total_matches = ranges.len();

        let keep = match mode {
            SearchMode::Any => total_matches > 0,
            SearchMode::All => per_term.iter().all(|t| t.count > 0),
            SearchMode::Exclude => doc.char_len > 0 && total_matches == 0,
        };
        if !keep {
            continue;
        }

        ranges.sort_unstable();
        let snippets = ranges
            .iter()
            .take(opts.max_snippets)
            .map(|&(start, end)| snippet(&doc.body, start, end, opts.snippet_radius))
            .collect();

        hits.push(SearchHit {
            label: doc.label.clone(),
            format: doc.format,
            source_uri: doc.source_uri.clone(),
            char_len: doc.char_len,
            total_matches,
            per_term,
            snippets,
        });
    }

    hits.sort_by(|a, b| {
        b.total_matches
            .cmp(&a.total_matches)
            .then_with(|| a.label.cmp(&b.label))
    });
    if let Some(limit) = opts.limit {
        hits.truncate(limit);
    }
    hits
}

/// Window of `radius` chars on each side of `body[start..end]`, on one line.
fn snippet(body: &str, start: usize, end: usize, radius: usize) -> String {
    let from = body[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map_or(start, |(i, _)| i);
    let to = body[end..]
        .char_indices()
        .nth(radius)
        .map_or(body.len(), |(i, _)| end + i);

    let mut out = String::new();
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(&body[from..to].replace('\n', " "));
    if to < body.len() {
        out.push_str("...");
    }
    out
}

/// CLI entry point: searches the artifact under `root` and prints results.
pub fn run_search(
    config: &Config,
    root: &Path,
    terms: &[String],
    mode: SearchMode,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let artifact = config.artifact_path(root);
    let docs = load_index(&artifact)?;
    let mut opts = SearchOptions::from(&config.search);
    opts.limit = limit;
    let hits = search(&docs, terms, mode, &opts);

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {}  [{}]  matches: {}",
            i + 1,
            hit.label,
            hit.format,
            hit.total_matches
        );
        if hit.per_term.len() > 1 {
            let counts: Vec<String> = hit
                .per_term
                .iter()
                .map(|t| format!("{}={}", t.term, t.count))
                .collect();
            println!("    terms: {}", counts.join(", "));
        }
        for snippet in &hit.snippets {
            println!("    > {}", snippet);
        }
        println!();
    }
    println!("{} of {} documents", hits.len(), docs.len());
    Ok(())
}
