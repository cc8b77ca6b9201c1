//! Text extraction for policy documents (PDF and plain text).
//!
//! PDFs are extracted page by page so that chunks can cite the page they
//! came from. Plain-text files form a single page-less unit.

use std::path::Path;
use thiserror::Error;

/// Extraction error. Extraction never panics on malformed input.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("text file is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Text of one page; `page` is 1-based and `None` for page-less formats.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

/// Read `path` and extract its pages according to the file extension.
/// Callers are expected to have checked the extension already; anything
/// other than `pdf` is treated as UTF-8 text.
pub fn extract_file(path: &Path) -> Result<Vec<PageText>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        extract_pdf_pages(&bytes)
    } else {
        extract_plain_text(&bytes)
    }
}

pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(idx, text)| PageText {
            page: Some(idx as u32 + 1),
            text,
        })
        .collect())
}

pub fn extract_plain_text(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let text = String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Encoding(e.to_string()))?;
    // Strip a UTF-8 byte-order mark left behind by some editors.
    let text = text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text);
    Ok(vec![PageText { page: None, text }])
}
