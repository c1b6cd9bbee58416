//! OCR capability for scanned PDFs and images.
//!
//! The engine only talks to the [`OcrEngine`] trait. [`TesseractOcr`]
//! rasterizes with Poppler's `pdftoppm` and recognizes with `tesseract`;
//! [`DisabledOcr`] is used when OCR is switched off in config.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::command::run_with_timeout;
use crate::config::OcrConfig;
use crate::error::OcrError;

pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// OCR of the first `max_pages` pages of a PDF.
    fn ocr_pdf(&self, pdf: &Path, max_pages: u32) -> Result<String, OcrError>;

    fn ocr_image(&self, image: &Path) -> Result<String, OcrError>;
}

/// Told when an OCR pass starts and ends, so pollers can show it.
pub trait OcrObserver {
    fn ocr_started(&mut self);
    fn ocr_finished(&mut self);
}

/// Observer that ignores notifications.
pub struct NoOcrObserver;

impl OcrObserver for NoOcrObserver {
    fn ocr_started(&mut self) {}
    fn ocr_finished(&mut self) {}
}

pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    fn ocr_pdf(&self, _pdf: &Path, _max_pages: u32) -> Result<String, OcrError> {
        Err(OcrError::Disabled)
    }

    fn ocr_image(&self, _image: &Path) -> Result<String, OcrError> {
        Err(OcrError::Disabled)
    }
}

pub struct TesseractOcr {
    language: String,
    dpi: u32,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig, timeout: Duration) -> Self {
        Self {
            language: config.language.clone(),
            dpi: config.dpi,
            timeout,
        }
    }

    fn recognize(&self, image: &Path) -> Result<String, OcrError> {
        let mut cmd = Command::new("tesseract");
        cmd.arg(image).arg("stdout").arg("-l").arg(&self.language);
        let out = run_with_timeout(cmd, self.timeout)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn rasterize(&self, pdf: &Path, max_pages: u32, out_dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
        let mut cmd = Command::new("pdftoppm");
        cmd.arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(max_pages.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(out_dir.join("page"));
        run_with_timeout(cmd, self.timeout)?;

        let mut pages: Vec<PathBuf> = std::fs::read_dir(out_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        // pdftoppm zero-pads page numbers, so lexical order is page order.
        pages.sort();
        Ok(pages)
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn ocr_pdf(&self, pdf: &Path, max_pages: u32) -> Result<String, OcrError> {
        let scratch = tempfile::Builder::new().prefix("docsift-ocr-").tempdir()?;
        let pages = self.rasterize(pdf, max_pages, scratch.path())?;
        if pages.is_empty() {
            return Err(OcrError::NoPages(pdf.to_path_buf()));
        }

        let mut text = String::new();
        for page in &pages {
            match self.recognize(page) {
                Ok(page_text) => {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    text.push_str(page_text.trim());
                }
                Err(e) => {
                    tracing::warn!(page = %page.display(), error = %e, "OCR failed for page");
                }
            }
        }
        Ok(text)
    }

    fn ocr_image(&self, image: &Path) -> Result<String, OcrError> {
        self.recognize(image)
    }
}

/// Builds the OCR engine selected by config.
pub fn from_config(config: &OcrConfig, timeout: Duration) -> Box<dyn OcrEngine> {
    if config.enabled {
        Box::new(TesseractOcr::new(config, timeout))
    } else {
        Box::new(DisabledOcr)
    }
}
