//! Multi-format text extraction with per-format fallback chains.
//!
//! Every [`DocFormat`] maps to an ordered list of [`Strategy`] values. The
//! dispatcher runs them in order until one produces enough text to be
//! accepted, keeping the longest result seen so far as a fallback. A strategy
//! that errors or panics simply counts as "no text". Extraction as a whole
//! never fails: at worst it yields an empty string.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use calamine::Reader as _;
use encoding_rs::{Encoding, WINDOWS_1251, WINDOWS_1252};
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{ElementRef, Html, Node};
use zip::ZipArchive;

use crate::command::run_with_timeout;
use crate::config::Config;
use crate::error::ExtractError;
use crate::models::{DocFormat, Source};
use crate::ocr::{NoOcrObserver, OcrEngine, OcrObserver};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Signature of OLE2 compound files (`.doc`, `.xls`).
const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Result of extracting one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    /// Raw extracted text, not yet normalized.
    pub text: String,
    pub ocr_used: bool,
    /// Name of the strategy that produced `text`, if any did.
    pub strategy: Option<&'static str>,
}

impl Extraction {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Text extraction capability used by the index writer.
///
/// An `Err` is reserved for failures that should abort the whole run;
/// [`FormatExtractor`] never returns one.
pub trait TextExtractor {
    fn extract(
        &self,
        source: &Source,
        observer: &mut dyn OcrObserver,
    ) -> anyhow::Result<Extraction>;
}

type StrategyFn = fn(&FormatExtractor, &Path) -> Result<String, ExtractError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Gate {
    Always,
    /// Only runs when every earlier strategy came back empty.
    IfEmpty,
}

struct Strategy {
    name: &'static str,
    gate: Gate,
    uses_ocr: bool,
    run: StrategyFn,
}

impl Strategy {
    const fn new(name: &'static str, run: StrategyFn) -> Self {
        Self {
            name,
            gate: Gate::Always,
            uses_ocr: false,
            run,
        }
    }

    const fn ocr(name: &'static str, run: StrategyFn) -> Self {
        Self {
            name,
            gate: Gate::IfEmpty,
            uses_ocr: true,
            run,
        }
    }
}

const PLAIN_TEXT: &[Strategy] = &[
    Strategy::new("utf8", plain_utf8),
    Strategy::new("utf16_bom", plain_utf16_bom),
    Strategy::new("legacy_codepage", plain_legacy),
];

const MARKUP_TEXT: &[Strategy] = &[
    Strategy::new("markup_strip", markup_strip),
    Strategy::new("markup_raw", decoded_raw),
];

const TABULAR_TEXT: &[Strategy] = &[
    Strategy::new("delimited_cells", tabular_cells),
    Strategy::new("tabular_raw", decoded_raw),
];

const PDF: &[Strategy] = &[
    Strategy::new("pdf_extract", pdf_layout_text),
    Strategy::new("lopdf", pdf_object_text),
    Strategy::ocr("pdf_ocr", pdf_ocr),
];

const LEGACY_DOC: &[Strategy] = &[
    Strategy::new("antiword", doc_antiword),
    Strategy::new("byte_filter", ole_byte_filter),
];

const WORD_DOCUMENT: &[Strategy] = &[
    Strategy::new("docx_paragraphs", docx_paragraphs),
    Strategy::new("docx_all_text", docx_all_text),
];

const SPREADSHEET: &[Strategy] = &[
    Strategy::new("xlsx_cells", xlsx_cells),
    Strategy::new("calamine", calamine_workbook),
];

const LEGACY_SPREADSHEET: &[Strategy] = &[
    Strategy::new("calamine", calamine_workbook),
    Strategy::new("byte_filter", ole_byte_filter),
];

const PRESENTATION: &[Strategy] = &[Strategy::new("pptx_slides", pptx_slides)];

const IMAGE: &[Strategy] = &[Strategy::ocr("image_ocr", image_ocr)];

fn chain(format: DocFormat) -> &'static [Strategy] {
    match format {
        DocFormat::PlainText => PLAIN_TEXT,
        DocFormat::MarkupText => MARKUP_TEXT,
        DocFormat::TabularText => TABULAR_TEXT,
        DocFormat::Pdf => PDF,
        DocFormat::LegacyDoc => LEGACY_DOC,
        DocFormat::WordDocument => WORD_DOCUMENT,
        DocFormat::Spreadsheet => SPREADSHEET,
        DocFormat::LegacySpreadsheet => LEGACY_SPREADSHEET,
        DocFormat::Presentation => PRESENTATION,
        DocFormat::Image => IMAGE,
    }
}

/// Default extractor: dispatches on [`DocFormat`] and walks the chain.
pub struct FormatExtractor {
    ocr: Box<dyn OcrEngine>,
    min_pdf_chars: usize,
    ocr_max_pages: u32,
    external_timeout: Duration,
}

impl FormatExtractor {
    pub fn new(config: &Config, ocr: Box<dyn OcrEngine>) -> Self {
        Self {
            ocr,
            min_pdf_chars: config.extract.min_pdf_chars,
            ocr_max_pages: config.ocr.max_pages,
            external_timeout: Duration::from_secs(config.extract.external_timeout_secs),
        }
    }

    fn accept_threshold(&self, format: DocFormat) -> usize {
        match format {
            DocFormat::Pdf => self.min_pdf_chars.max(1),
            _ => 1,
        }
    }

    /// Extracts text from a file on disk. Never fails.
    pub fn extract_path(
        &self,
        path: &Path,
        format: DocFormat,
        observer: &mut dyn OcrObserver,
    ) -> Extraction {
        let threshold = self.accept_threshold(format);
        let mut best: Option<(String, usize, &Strategy)> = None;

        for strategy in chain(format) {
            if strategy.gate == Gate::IfEmpty && best.is_some() {
                continue;
            }

            if strategy.uses_ocr {
                observer.ocr_started();
            }
            let result = self.run_guarded(strategy, path);
            if strategy.uses_ocr {
                observer.ocr_finished();
            }

            let text = match result {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        strategy = strategy.name,
                        error = %e,
                        "extraction strategy failed"
                    );
                    continue;
                }
            };

            let len = meaningful_len(&text);
            if len == 0 {
                continue;
            }
            if best.as_ref().map_or(true, |(_, best_len, _)| len > *best_len) {
                best = Some((text, len, strategy));
            }
            if len >= threshold {
                break;
            }
        }

        match best {
            Some((text, _, strategy)) => Extraction {
                text,
                ocr_used: strategy.uses_ocr,
                strategy: Some(strategy.name),
            },
            None => Extraction::empty(),
        }
    }

    /// Extracts text from in-memory bytes by spilling them to a scratch file.
    pub fn extract_bytes(&self, bytes: &[u8], format: DocFormat) -> Extraction {
        let spilled = tempfile::Builder::new()
            .prefix("docsift-bytes-")
            .suffix(&format!(".{}", format.primary_extension()))
            .tempfile()
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.flush()?;
                Ok(file)
            });
        match spilled {
            Ok(file) => self.extract_path(file.path(), format, &mut NoOcrObserver),
            Err(e) => {
                tracing::warn!(error = %e, "could not spill bytes for extraction");
                Extraction::empty()
            }
        }
    }

    fn run_guarded(&self, strategy: &Strategy, path: &Path) -> Result<String, ExtractError> {
        match catch_unwind(AssertUnwindSafe(|| (strategy.run)(self, path))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ExtractError::Panicked(msg))
            }
        }
    }
}

impl TextExtractor for FormatExtractor {
    fn extract(
        &self,
        source: &Source,
        observer: &mut dyn OcrObserver,
    ) -> anyhow::Result<Extraction> {
        if source.oversized {
            tracing::warn!(
                label = %source.label,
                size = source.size,
                "file exceeds max_file_bytes, indexing without text"
            );
            return Ok(Extraction::empty());
        }
        Ok(self.extract_path(&source.content_location, source.format, observer))
    }
}

/// Orders sources cheapest first: by cost tier, then size, then label.
pub fn prioritize(sources: &mut [Source]) {
    sources.sort_by_cached_key(|s| (s.tier(), s.size, s.label.encode()));
}

fn meaningful_len(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .count()
}

// ── Plain text ──────────────────────────────────────────────────────────

fn plain_utf8(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|e| ExtractError::Decode(e.to_string()))
}

fn plain_utf16_bom(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    match Encoding::for_bom(&bytes) {
        Some((encoding, bom_len)) if encoding != encoding_rs::UTF_8 => {
            let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
            Ok(text.into_owned())
        }
        _ => Err(ExtractError::Decode("no UTF-16 byte order mark".to_string())),
    }
}

fn plain_legacy(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    Ok(decode_legacy(&std::fs::read(path)?))
}

fn decoded_raw(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    Ok(decode_text(&std::fs::read(path)?))
}

/// UTF-8, then BOM-marked UTF-16, then the legacy code page.
fn decode_text(bytes: &[u8]) -> String {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return text.to_string();
    }
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    decode_legacy(bytes)
}

/// Windows-1251, falling back to Latin-1 when a byte is unmapped.
pub fn decode_legacy(bytes: &[u8]) -> String {
    let (text, had_errors) = WINDOWS_1251.decode_without_bom_handling(bytes);
    if !had_errors {
        return text.into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

// ── Markup and delimited text ───────────────────────────────────────────

fn markup_strip(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let text = decode_text(&std::fs::read(path)?);
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    Ok(match sniff_markup(&text, &ext) {
        Some(Markup::Html) => html_text(&text),
        Some(Markup::Rtf) => strip_rtf(&text),
        None => text,
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Markup {
    Html,
    Rtf,
}

/// Content wins over the extension, so spilled bytes are still recognized.
fn sniff_markup(text: &str, ext: &str) -> Option<Markup> {
    let head = text.trim_start();
    if head.starts_with("{\\rtf") {
        return Some(Markup::Rtf);
    }
    if head.starts_with('<') {
        return Some(Markup::Html);
    }
    match ext {
        "html" | "htm" | "xml" => Some(Markup::Html),
        "rtf" => Some(Markup::Rtf),
        _ => None,
    }
}

const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "table", "section",
];

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Text nodes of an HTML/XML document. Comments and attributes are dropped,
/// entities come back decoded, block elements end lines.
fn html_text(src: &str) -> String {
    let document = Html::parse_document(src);
    let mut out = String::with_capacity(src.len() / 2);
    collect_text(document.root_element(), &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child.value().name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                collect_text(child, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Plain text of an RTF document: control words dropped, `\par` kept as
/// newlines, hex escapes decoded as Windows-1252.
fn strip_rtf(src: &str) -> String {
    const SKIPPED_GROUPS: &[&str] = &["fonttbl", "colortbl", "stylesheet", "info", "pict"];

    let mut out = String::with_capacity(src.len() / 2);
    let mut chars = src.chars().peekable();
    let mut depth = 0usize;
    let mut skip_from: Option<usize> = None;

    while let Some(c) = chars.next() {
        match c {
            '{' => depth += 1,
            '}' => {
                if skip_from == Some(depth) {
                    skip_from = None;
                }
                depth = depth.saturating_sub(1);
            }
            '\\' => match chars.peek().copied() {
                Some(esc @ ('\\' | '{' | '}')) => {
                    chars.next();
                    if skip_from.is_none() {
                        out.push(esc);
                    }
                }
                Some('\'') => {
                    chars.next();
                    let hex: String = chars.by_ref().take(2).collect();
                    if skip_from.is_none() {
                        if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                            let one = [byte];
                            let (decoded, _) = WINDOWS_1252.decode_without_bom_handling(&one);
                            out.push_str(&decoded);
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    skip_from.get_or_insert(depth);
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch.is_ascii_alphabetic() {
                            word.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    while let Some(&ch) = chars.peek() {
                        if ch == '-' || ch.is_ascii_digit() {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if chars.peek() == Some(&' ') {
                        chars.next();
                    }
                    if SKIPPED_GROUPS.contains(&word.as_str()) {
                        skip_from.get_or_insert(depth);
                    } else if skip_from.is_none() {
                        match word.as_str() {
                            "par" | "line" => out.push('\n'),
                            "tab" => out.push('\t'),
                            _ => {}
                        }
                    }
                }
            },
            '\r' | '\n' => {}
            _ => {
                if skip_from.is_none() {
                    out.push(c);
                }
            }
        }
    }
    out
}

fn tabular_cells(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let text = decode_text(&std::fs::read(path)?);
    let is_tsv = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
    let delimiter = if is_tsv {
        '\t'
    } else {
        sniff_delimiter(text.lines().next().unwrap_or(""))
    };

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let cells: Vec<String> = split_delimited(line, delimiter)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if cells.is_empty() {
            continue;
        }
        out.push_str(&cells.join(" | "));
        out.push('\n');
    }
    Ok(out)
}

fn sniff_delimiter(header: &str) -> char {
    // max_by_key keeps the last maximum, so ',' wins ties.
    ['\t', ';', ',']
        .into_iter()
        .max_by_key(|d| header.matches(*d).count())
        .unwrap_or(',')
}

fn split_delimited(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => cells.push(std::mem::take(&mut cell).trim().to_string()),
            c => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

// ── PDF ─────────────────────────────────────────────────────────────────

fn pdf_layout_text(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn pdf_object_text(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let document = lopdf::Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(ExtractError::Pdf("document has no pages".to_string()));
    }
    document
        .extract_text(&pages)
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn pdf_ocr(extractor: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    Ok(extractor.ocr.ocr_pdf(path, extractor.ocr_max_pages)?)
}

fn image_ocr(extractor: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    Ok(extractor.ocr.ocr_image(path)?)
}

// ── Legacy Word and Excel ───────────────────────────────────────────────

fn doc_antiword(extractor: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let mut cmd = Command::new("antiword");
    cmd.arg("-w").arg("0").arg(path);
    let out = run_with_timeout(cmd, extractor.external_timeout)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Printable ASCII and the 0xC0–0xFF range of an OLE2 file, decoded with
/// the legacy code page. Files without the OLE2 signature are rejected.
fn ole_byte_filter(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    if !bytes.starts_with(&OLE2_MAGIC) {
        return Err(ExtractError::Decode("missing OLE2 signature".to_string()));
    }
    Ok(decode_legacy(&filter_legacy_bytes(&bytes[OLE2_MAGIC.len()..])))
}

pub fn filter_legacy_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut last_was_gap = true;
    for &b in bytes {
        if matches!(b, b'\t' | b'\n' | b'\r' | 0x20..=0x7E | 0xC0..=0xFF) {
            out.push(b);
            last_was_gap = false;
        } else if !last_was_gap {
            out.push(b' ');
            last_was_gap = true;
        }
    }
    out
}

// ── OOXML ───────────────────────────────────────────────────────────────

fn open_zip(path: &Path) -> Result<ZipArchive<File>, ExtractError> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn docx_paragraphs(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let mut archive = open_zip(path)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    wordprocessing_text(&xml)
}

/// `w:t` runs, with `w:p` ending a line and `w:tab`/`w:br` kept.
fn wordprocessing_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Every text node of the body, header, footer and note parts.
fn docx_all_text(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    const PARTS: &[&str] = &["word/document", "word/header", "word/footer", "word/footnotes", "word/endnotes"];

    let mut archive = open_zip(path)?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(".xml") && PARTS.iter().any(|p| n.starts_with(p)))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|n| (n != "word/document.xml", n.clone()));

    let mut out = String::new();
    for name in names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = all_text_nodes(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn all_text_nodes(xml: &[u8]) -> Result<String, ExtractError> {
    let mut parts: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(te)) => {
                let text = te.unescape().unwrap_or_default();
                if !text.is_empty() {
                    parts.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(parts.join(" "))
}

fn pptx_slides(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let mut archive = open_zip(path)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| numbered_part(name, "ppt/slides/slide"));
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = drawing_text(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// `a:t` runs of a slide, one line per `a:p` paragraph.
fn drawing_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn numbered_part(name: &str, prefix: &str) -> u32 {
    name.trim_start_matches(prefix)
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

fn xlsx_cells(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let mut archive = open_zip(path)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    if sheet_names.is_empty() {
        return Err(ExtractError::Ooxml("workbook has no worksheets".to_string()));
    }
    sheet_names.sort_by_key(|name| numbered_part(name, "xl/worksheets/sheet"));

    let mut out = String::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = sheet_rows(&sheet_xml, &shared_strings)?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Shared string table; a workbook without one has only inline values.
fn read_shared_strings<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<String>, ExtractError> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut kind = CellKind::Value;
    let mut in_value = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let cell = match kind {
                        CellKind::Shared => value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned()),
                        CellKind::Inline | CellKind::Value => Some(value.to_string()),
                    };
                    if let Some(cell) = cell {
                        row.push(cell);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => {
                    if !row.is_empty() {
                        out.push_str(&row.join(" "));
                        out.push('\n');
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        out.push_str(&row.join(" "));
    }
    Ok(out)
}

fn calamine_workbook(_: &FormatExtractor, path: &Path) -> Result<String, ExtractError> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
    let mut out = String::new();
    for name in workbook.sheet_names().into_iter().take(XLSX_MAX_SHEETS) {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::debug!(sheet = %name, error = %e, "skipping unreadable sheet");
                continue;
            }
        };
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .filter(|c| !matches!(c, calamine::Data::Empty))
                .map(|c| c.to_string())
                .collect();
            if !cells.is_empty() {
                out.push_str(&cells.join(" "));
                out.push('\n');
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::ocr::DisabledOcr;
    use crate::vpath::VirtualPath;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn extractor() -> FormatExtractor {
        FormatExtractor::new(&Config::minimal(), Box::new(DisabledOcr))
    }

    struct FakeOcr {
        text: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl OcrEngine for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }
        fn ocr_pdf(&self, _pdf: &Path, _max_pages: u32) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
        fn ocr_image(&self, _image: &Path) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    struct PanickingOcr;

    impl OcrEngine for PanickingOcr {
        fn name(&self) -> &str {
            "panics"
        }
        fn ocr_pdf(&self, _pdf: &Path, _max_pages: u32) -> Result<String, OcrError> {
            panic!("rasterizer exploded")
        }
        fn ocr_image(&self, _image: &Path) -> Result<String, OcrError> {
            panic!("rasterizer exploded")
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        started: usize,
        finished: usize,
    }

    impl OcrObserver for CountingObserver {
        fn ocr_started(&mut self) {
            self.started += 1;
        }
        fn ocr_finished(&mut self) {
            self.finished += 1;
        }
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn write_tmp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn source(path: PathBuf, label: &str, size: u64) -> Source {
        Source {
            label: VirtualPath::parse(label).unwrap(),
            content_location: path,
            origin_label: label.to_string(),
            depth: 0,
            format: DocFormat::from_name(label).unwrap_or(DocFormat::PlainText),
            size,
            modified: Utc::now(),
            oversized: false,
        }
    }

    #[test]
    fn empty_input_yields_empty_text_for_every_format() {
        let ex = extractor();
        for format in DocFormat::ALL {
            let got = ex.extract_bytes(b"", format);
            assert_eq!(got.text, "", "format {format:?}");
            assert!(!got.ocr_used);
        }
    }

    #[test]
    fn corrupted_binary_input_yields_empty_text() {
        let ex = extractor();
        let binary_formats = [
            DocFormat::Pdf,
            DocFormat::LegacyDoc,
            DocFormat::WordDocument,
            DocFormat::Spreadsheet,
            DocFormat::LegacySpreadsheet,
            DocFormat::Presentation,
            DocFormat::Image,
        ];
        for format in binary_formats {
            let got = ex.extract_bytes(b"definitely not a valid document", format);
            assert_eq!(got.text, "", "format {format:?}");
        }
        for format in [DocFormat::PlainText, DocFormat::MarkupText, DocFormat::TabularText] {
            let got = ex.extract_bytes(b"\x00\x00\x01\x02", format);
            assert_eq!(got.text, "", "format {format:?}");
        }
    }

    #[test]
    fn utf8_text_with_bom() {
        let got = extractor().extract_bytes(b"\xEF\xBB\xBFhello", DocFormat::PlainText);
        assert_eq!(got.text, "hello");
        assert_eq!(got.strategy, Some("utf8"));
    }

    #[test]
    fn utf16_text_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi there".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let got = extractor().extract_bytes(&bytes, DocFormat::PlainText);
        assert_eq!(got.text, "hi there");
        assert_eq!(got.strategy, Some("utf16_bom"));
    }

    #[test]
    fn cp1251_text_falls_back_to_legacy_codepage() {
        // "Привет" in Windows-1251.
        let bytes = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        let got = extractor().extract_bytes(&bytes, DocFormat::PlainText);
        assert_eq!(got.text, "Привет");
        assert_eq!(got.strategy, Some("legacy_codepage"));
    }

    #[test]
    fn html_tags_scripts_and_entities_are_stripped() {
        let html = b"<html><head><style>p{}</style><script>var x = 1;</script></head>\
            <body><p>Fish &amp; chips</p><p>caf&#233;</p></body></html>";
        let got = extractor().extract_bytes(html, DocFormat::MarkupText);
        assert_eq!(got.strategy, Some("markup_strip"));
        assert!(got.text.contains("Fish & chips"));
        assert!(got.text.contains("caf\u{e9}"));
        assert!(!got.text.contains("var x"));
        assert!(!got.text.contains("p{}"));
    }

    #[test]
    fn html_comments_attributes_and_named_entities() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "page.html",
            b"<!-- <p>draft secret</p> --><p>&laquo;Tender&raquo; &mdash; lot</p><a title=\"x>y\">link</a>",
        );
        let got = extractor().extract_path(&path, DocFormat::MarkupText, &mut NoOcrObserver);
        assert!(!got.text.contains("draft secret"));
        assert!(!got.text.contains("-->"));
        assert!(!got.text.contains("y\""));
        assert!(got.text.contains("\u{ab}Tender\u{bb} \u{2014} lot"));
        assert!(got.text.contains("link"));
    }

    #[test]
    fn rtf_bytes_are_recognized_by_content() {
        let rtf = br"{\rtf1\ansi{\fonttbl{\f0 Arial;}}\f0 Minutes\par of the meeting}";
        let got = extractor().extract_bytes(rtf, DocFormat::MarkupText);
        assert_eq!(got.strategy, Some("markup_strip"));
        assert!(got.text.contains("Minutes\nof the meeting"));
        assert!(!got.text.contains("Arial"));
        assert!(!got.text.contains("\\par"));
    }

    #[test]
    fn markdown_is_kept_verbatim() {
        let got = extractor().extract_bytes(b"# Title\n\nsome *text*", DocFormat::MarkupText);
        assert_eq!(got.text, "# Title\n\nsome *text*");
    }

    #[test]
    fn rtf_control_words_are_stripped() {
        let rtf = r"{\rtf1\ansi{\fonttbl{\f0 Arial;}}\f0\fs24 Hello\par World caf\'e9 \{x\}}";
        let text = strip_rtf(rtf);
        assert!(text.contains("Hello\nWorld"));
        assert!(text.contains("café"));
        assert!(text.contains("{x}"));
        assert!(!text.contains("Arial"));
    }

    #[test]
    fn csv_cells_are_joined() {
        let got = extractor().extract_bytes(b"name;city\n\"Doe; John\";Oslo\n", DocFormat::TabularText);
        assert_eq!(got.text, "name | city\nDoe; John | Oslo\n");
    }

    #[test]
    fn docx_paragraphs_are_extracted() {
        let docx = zip_bytes(&[(
            "word/document.xml",
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>\
             <w:p><w:r><w:t xml:space=\"preserve\">office </w:t></w:r><w:r><w:t>test</w:t></w:r></w:p>\
             <w:p><w:r><w:t>second &amp; last</w:t></w:r></w:p></w:body></w:document>",
        )]);
        let got = extractor().extract_bytes(&docx, DocFormat::WordDocument);
        assert_eq!(got.text, "office test\nsecond & last\n");
        assert_eq!(got.strategy, Some("docx_paragraphs"));
    }

    #[test]
    fn docx_without_body_text_falls_back_to_headers() {
        let docx = zip_bytes(&[
            ("word/document.xml", "<w:document xmlns:w=\"w\"><w:body/></w:document>"),
            ("word/header1.xml", "<w:hdr xmlns:w=\"w\"><w:p><w:r><w:t>Letterhead</w:t></w:r></w:p></w:hdr>"),
        ]);
        let got = extractor().extract_bytes(&docx, DocFormat::WordDocument);
        assert_eq!(got.text, "Letterhead");
        assert_eq!(got.strategy, Some("docx_all_text"));
    }

    #[test]
    fn xlsx_shared_inline_and_numeric_cells() {
        let xlsx = zip_bytes(&[
            (
                "xl/sharedStrings.xml",
                "<sst><si><t>Revenue</t></si><si><r><t>Q1 </t></r><r><t>total</t></r></si></sst>",
            ),
            (
                "xl/worksheets/sheet1.xml",
                "<worksheet><sheetData>\
                 <row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row>\
                 <row><c><v>42</v></c><c t=\"inlineStr\"><is><t>inline</t></is></c></row>\
                 </sheetData></worksheet>",
            ),
        ]);
        let got = extractor().extract_bytes(&xlsx, DocFormat::Spreadsheet);
        assert_eq!(got.text, "Revenue Q1 total\n42 inline\n");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let pptx = zip_bytes(&[
            ("ppt/slides/slide10.xml", "<p:sld xmlns:a=\"a\" xmlns:p=\"p\"><a:p><a:r><a:t>ten</a:t></a:r></a:p></p:sld>"),
            ("ppt/slides/slide2.xml", "<p:sld xmlns:a=\"a\" xmlns:p=\"p\"><a:p><a:r><a:t>two</a:t></a:r></a:p></p:sld>"),
        ]);
        let got = extractor().extract_bytes(&pptx, DocFormat::Presentation);
        assert_eq!(got.text, "two\n\nten\n");
    }

    #[test]
    fn legacy_doc_byte_filter_needs_ole_signature() {
        let mut doc = OLE2_MAGIC.to_vec();
        doc.extend_from_slice(b"\x00\x01Quarterly\x00\x00report\x02");
        let got = extractor().extract_bytes(&doc, DocFormat::LegacyDoc);
        assert_eq!(got.text.trim(), "Quarterly report");
        assert_eq!(got.strategy, Some("byte_filter"));
    }

    #[test]
    fn legacy_xls_falls_back_to_byte_filter() {
        let mut xls = OLE2_MAGIC.to_vec();
        xls.extend_from_slice(b"\x00\x01Budget\x00\x00Q3\x03");
        let got = extractor().extract_bytes(&xls, DocFormat::LegacySpreadsheet);
        assert_eq!(got.text.trim(), "Budget Q3");
        assert_eq!(got.strategy, Some("byte_filter"));

        let got = extractor().extract_bytes(b"Budget Q3 without signature", DocFormat::LegacySpreadsheet);
        assert_eq!(got.text, "");
    }

    #[test]
    fn byte_filter_keeps_extended_range() {
        let filtered = filter_legacy_bytes(b"ab\x01\x02\xC0\x7F\x80cd");
        assert_eq!(filtered, b"ab \xC0 cd");
        assert_eq!(decode_legacy(&filtered), "ab А cd");
    }

    #[test]
    fn unreadable_pdf_falls_through_to_ocr() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ex = FormatExtractor::new(
            &Config::minimal(),
            Box::new(FakeOcr {
                text: "scanned words",
                calls: calls.clone(),
            }),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "scan.pdf", b"%PDF-1.4 garbage with no objects");
        let mut observer = CountingObserver::default();
        let got = ex.extract_path(&path, DocFormat::Pdf, &mut observer);
        assert_eq!(got.text, "scanned words");
        assert!(got.ocr_used);
        assert_eq!(got.strategy, Some("pdf_ocr"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!((observer.started, observer.finished), (1, 1));
    }

    #[test]
    fn panicking_strategy_degrades_to_empty() {
        let ex = FormatExtractor::new(&Config::minimal(), Box::new(PanickingOcr));
        let got = ex.extract_bytes(b"not a picture", DocFormat::Image);
        assert_eq!(got, Extraction::empty());
    }

    #[test]
    fn image_uses_ocr() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ex = FormatExtractor::new(
            &Config::minimal(),
            Box::new(FakeOcr {
                text: "receipt total 12",
                calls: calls.clone(),
            }),
        );
        let got = ex.extract_bytes(b"\x89PNG", DocFormat::Image);
        assert_eq!(got.text, "receipt total 12");
        assert!(got.ocr_used);
    }

    #[test]
    fn oversized_sources_are_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "big.txt", b"content that would be indexed");
        let mut src = source(path, "big.txt", 29);
        src.oversized = true;
        let got = extractor().extract(&src, &mut NoOcrObserver).unwrap();
        assert_eq!(got, Extraction::empty());
    }

    #[test]
    fn prioritize_orders_by_tier_then_size() {
        let p = PathBuf::from("/unused");
        let mut sources = vec![
            source(p.clone(), "zip://c.zip!/tiny.txt", 1),
            source(p.clone(), "big.pdf", 900),
            source(p.clone(), "small.pdf", 10),
            source(p.clone(), "report.docx", 5_000),
            source(p.clone(), "notes.txt", 7_000),
            source(p.clone(), "a.txt", 3),
        ];
        prioritize(&mut sources);
        let order: Vec<String> = sources.iter().map(|s| s.label.encode()).collect();
        assert_eq!(
            order,
            [
                "a.txt",
                "notes.txt",
                "report.docx",
                "small.pdf",
                "big.pdf",
                "zip://c.zip!/tiny.txt"
            ]
        );
    }
}
