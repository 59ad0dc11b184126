//! Text extraction from document archives
//!
//! A document download is a zip archive holding the page files (`.rm`), the
//! `.content` / `.metadata` JSON, optional `.txt`/`.md` exports and highlight
//! JSON. A malformed entry contributes nothing; only an unreadable archive
//! fails the extraction.
//!
//! Text typed on the device (Type Folio) lives inside the v6 `.rm` scene
//! data and is not decoded here; handwriting and typed pages alike are only
//! read back through OCR.

use std::io::{Cursor, Read};
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::ocr::{OcrBackend, OcrContext, OcrDispatcher};

pub const NO_TEXT_PLACEHOLDER: &str = "(No text content found)";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Raw contents of a document archive
#[derive(Debug, Default)]
pub struct DocumentArchive {
    /// `.rm` page files in reading order
    pub pages: Vec<Vec<u8>>,
    pub typed_text: Vec<String>,
    pub highlights: Vec<String>,
}

/// Text extracted from a document
#[derive(Debug, Default, Clone)]
pub struct ExtractedContent {
    pub typed_text: Vec<String>,
    pub highlights: Vec<String>,
    /// One entry per page when OCR ran and recognised anything
    pub handwritten_text: Option<Vec<String>>,
    /// Backend that recognised `handwritten_text`
    pub ocr_backend: Option<OcrBackend>,
    pub page_count: usize,
    /// Why OCR produced nothing, when it was requested and failed hard
    pub ocr_error: Option<String>,
}

impl ExtractedContent {
    /// Plain-text rendering used for resource reads
    pub fn to_text(&self) -> String {
        let mut parts: Vec<String> = self.typed_text.clone();

        if !self.highlights.is_empty() {
            parts.push("--- Highlights ---".to_string());
            parts.extend(self.highlights.iter().cloned());
        }

        if let Some(pages) = &self.handwritten_text {
            let pages: Vec<&String> = pages.iter().filter(|p| !p.is_empty()).collect();
            if !pages.is_empty() {
                parts.push("--- Handwritten (OCR) ---".to_string());
                parts.extend(pages.into_iter().cloned());
            }
        }

        if parts.is_empty() {
            return match &self.ocr_error {
                Some(e) => format!("{}\n(OCR unavailable: {})", NO_TEXT_PLACEHOLDER, e),
                None => NO_TEXT_PLACEHOLDER.to_string(),
            };
        }
        parts.join("\n\n")
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Page ids in reading order from a `.content` file, both the old `pages`
/// list and the newer `cPages.pages[].id` form
fn page_order(content: &Value) -> Vec<String> {
    if let Some(pages) = content.get("pages").and_then(Value::as_array) {
        return pages
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect();
    }
    content
        .pointer("/cPages/pages")
        .and_then(Value::as_array)
        .map(|pages| {
            pages
                .iter()
                .filter_map(|p| p.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Highlight texts, flat (`[{text}]`) or grouped per layer (`[[{text}]]`)
fn collect_highlights(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(values) => values.iter().for_each(|v| collect_highlights(v, out)),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    out.push(text.to_string());
                }
            }
        }
        _ => {}
    }
}

/// Read an archive without OCR
pub fn read_archive(bytes: &[u8]) -> Result<DocumentArchive> {
    if bytes.starts_with(b"%PDF") {
        return Err(ExtractError::UnsupportedFormat(
            "device returned a PDF export instead of a document archive".to_string(),
        ));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::InvalidArchive(e.to_string()))?;

    let mut result = DocumentArchive::default();
    let mut pages: Vec<(String, Vec<u8>)> = Vec::new();
    let mut order: Vec<String> = Vec::new();

    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!("Skipping archive entry {}: {}", i, e);
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::new();
        if let Err(e) = file.read_to_end(&mut data) {
            tracing::debug!("Skipping unreadable entry {}: {}", name, e);
            continue;
        }

        match extension(&name).as_deref() {
            Some("rm") => pages.push((name, data)),
            Some("txt") | Some("md") => {
                let text = String::from_utf8_lossy(&data);
                if !text.trim().is_empty() {
                    result.typed_text.push(text.into_owned());
                }
            }
            Some("content") => {
                let Ok(content) = serde_json::from_slice::<Value>(&data) else {
                    continue;
                };
                if let Some(text) = content.get("text").and_then(Value::as_str) {
                    result.typed_text.push(text.to_string());
                }
                order = page_order(&content);
            }
            Some("json") => {
                let Ok(json) = serde_json::from_slice::<Value>(&data) else {
                    continue;
                };
                if let Some(highlights) = json.get("highlights") {
                    collect_highlights(highlights, &mut result.highlights);
                }
            }
            _ => {}
        }
    }

    pages.sort_by(|(a, _), (b, _)| {
        let position = |name: &str| order.iter().position(|id| id == stem(name));
        match (position(a), position(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    });
    result.pages = pages.into_iter().map(|(_, data)| data).collect();

    Ok(result)
}

/// Extract all text from a document archive, running OCR over the pages
/// when a dispatcher is given.
pub async fn extract_document(
    bytes: &[u8],
    ocr: Option<(&OcrDispatcher, &OcrContext)>,
) -> Result<ExtractedContent> {
    let archive = read_archive(bytes)?;

    let mut content = ExtractedContent {
        page_count: archive.pages.len(),
        typed_text: archive.typed_text,
        highlights: archive.highlights,
        ..Default::default()
    };

    if let Some((dispatcher, ctx)) = ocr {
        if !archive.pages.is_empty() {
            match dispatcher.ocr_pages(&archive.pages, ctx).await {
                Ok(Some(output)) => {
                    content.ocr_backend = Some(output.backend);
                    content.handwritten_text = Some(output.pages);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Handwriting OCR failed: {}", e);
                    content.ocr_error = Some(e.to_string());
                }
            }
        }
    }

    Ok(content)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    pub(crate) fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_read_archive_collects_text_and_highlights() {
        let bytes = build_archive(&[
            ("doc.content", br#"{"text": "typed in content", "pages": ["p2", "p1"]}"#),
            ("doc/p1.rm", b"page-one"),
            ("doc/p2.rm", b"page-two"),
            ("doc.txt", b"exported text"),
            ("empty.md", b"   "),
            ("doc.highlights/p1.json", br#"{"highlights": [[{"text": "marked"}, {"text": ""}]]}"#),
            ("broken.json", b"{oops"),
        ]);

        let archive = read_archive(&bytes).unwrap();

        assert_eq!(archive.pages, vec![b"page-two".to_vec(), b"page-one".to_vec()]);
        assert!(archive.typed_text.contains(&"typed in content".to_string()));
        assert!(archive.typed_text.contains(&"exported text".to_string()));
        assert_eq!(archive.typed_text.len(), 2);
        assert_eq!(archive.highlights, vec!["marked".to_string()]);
    }

    #[test]
    fn test_new_style_page_order() {
        let content = serde_json::json!({"cPages": {"pages": [{"id": "b"}, {"id": "a"}]}});
        assert_eq!(page_order(&content), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_pdf_and_garbage_rejected() {
        assert!(matches!(
            read_archive(b"%PDF-1.7 ..."),
            Err(ExtractError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            read_archive(b"not a zip"),
            Err(ExtractError::InvalidArchive(_))
        ));
    }

    #[test]
    fn test_to_text_placeholder_and_sections() {
        assert_eq!(ExtractedContent::default().to_text(), NO_TEXT_PLACEHOLDER);

        let content = ExtractedContent {
            typed_text: vec!["hello".to_string()],
            highlights: vec!["marked".to_string()],
            handwritten_text: Some(vec!["ink".to_string(), String::new()]),
            ocr_backend: None,
            page_count: 2,
            ocr_error: None,
        };
        assert_eq!(
            content.to_text(),
            "hello\n\n--- Highlights ---\n\nmarked\n\n--- Handwritten (OCR) ---\n\nink"
        );
    }

    #[tokio::test]
    async fn test_extract_without_ocr() {
        let bytes = build_archive(&[("doc/p1.rm", b"ink"), ("doc.md", b"# Title")]);

        let content = extract_document(&bytes, None).await.unwrap();
        assert_eq!(content.page_count, 1);
        assert_eq!(content.typed_text, vec!["# Title".to_string()]);
        assert!(content.handwritten_text.is_none());
    }
}
