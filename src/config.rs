use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Name of the canonical index artifact when none is configured.
pub const DEFAULT_INDEX_NAME: &str = "_docsift_index.txt";
/// Progress snapshot file name, placed beside the artifact.
pub const DEFAULT_PROGRESS_NAME: &str = "_docsift_progress.json";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_archive_depth")]
    pub archive_depth: usize,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// Directory holding the artifact. Defaults to the indexed root.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub progress_path: Option<PathBuf>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_member_bytes")]
    pub max_member_bytes: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            archive_depth: default_archive_depth(),
            index_name: default_index_name(),
            output_dir: None,
            progress_path: None,
            max_file_bytes: default_max_file_bytes(),
            max_member_bytes: default_max_member_bytes(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_max_depth() -> usize {
    8
}
fn default_archive_depth() -> usize {
    2
}
fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}
fn default_max_file_bytes() -> u64 {
    200 * 1024 * 1024
}
fn default_max_member_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    /// Below this many characters the PDF text layer counts as missing.
    #[serde(default = "default_min_pdf_chars")]
    pub min_pdf_chars: usize,
    #[serde(default = "default_external_timeout_secs")]
    pub external_timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_pdf_chars: default_min_pdf_chars(),
            external_timeout_secs: default_external_timeout_secs(),
        }
    }
}

fn default_min_pdf_chars() -> usize {
    50
}
fn default_external_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    /// Cap on rasterized pages for every OCR call site.
    #[serde(default = "default_ocr_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_ocr_dpi")]
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: default_ocr_language(),
            max_pages: default_ocr_max_pages(),
            dpi: default_ocr_dpi(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ocr_language() -> String {
    "eng+rus".to_string()
}
fn default_ocr_max_pages() -> u32 {
    3
}
fn default_ocr_dpi() -> u32 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_snippet_radius")]
    pub snippet_radius: usize,
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_radius: default_snippet_radius(),
            max_snippets: default_max_snippets(),
        }
    }
}

fn default_snippet_radius() -> usize {
    60
}
fn default_max_snippets() -> usize {
    3
}

impl Config {
    /// Built-in defaults, used when no config file is present.
    pub fn minimal() -> Self {
        Self {
            index: IndexConfig::default(),
            extract: ExtractConfig::default(),
            ocr: OcrConfig::default(),
            search: SearchConfig::default(),
        }
    }

    /// Directory that receives the canonical artifact for `root`.
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        self.index
            .output_dir
            .clone()
            .unwrap_or_else(|| root.to_path_buf())
    }

    pub fn artifact_path(&self, root: &Path) -> PathBuf {
        self.output_dir(root).join(&self.index.index_name)
    }

    /// Progress snapshot location: beside the artifact while the output
    /// directory exists, otherwise a file in the system temp dir keyed by
    /// that directory, so a run over a missing root still reports its error.
    pub fn progress_path(&self, root: &Path) -> PathBuf {
        if let Some(path) = &self.index.progress_path {
            return path.clone();
        }
        let dir = self.output_dir(root);
        if dir.is_dir() {
            return dir.join(DEFAULT_PROGRESS_NAME);
        }
        let absolute = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir().map(|cwd| cwd.join(&dir)).unwrap_or(dir)
        };
        let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
        let key: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        std::env::temp_dir().join(format!("docsift-progress-{key}.json"))
    }
}

/// Loads and validates a TOML config. A missing file yields [`Config::minimal`].
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::minimal());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let name = config.index.index_name.as_str();
    if name.is_empty() {
        anyhow::bail!("index.index_name must not be empty");
    }
    if name.contains('/') || name.contains('\\') {
        anyhow::bail!("index.index_name must be a bare file name, got '{}'", name);
    }

    if config.ocr.max_pages == 0 {
        anyhow::bail!("ocr.max_pages must be >= 1");
    }

    if config.search.snippet_radius == 0 {
        anyhow::bail!("search.snippet_radius must be >= 1");
    }

    if config.extract.external_timeout_secs == 0 {
        anyhow::bail!("extract.external_timeout_secs must be >= 1");
    }

    Ok(())
}
