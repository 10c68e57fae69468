use super::resolve_source_name;
use crate::types::{ExtractedContent, ExtractionMethod, FetchedDocument};
use crate::utils;
use lopdf::{Document, Object};
use tracing::debug;

/// Longest first line accepted as a stand-in title.
const MAX_TITLE_CHARS: usize = 150;

/// What the embedded text layer of a PDF yielded.
#[derive(Debug, Default)]
pub struct EmbeddedText {
    pub pages: usize,
    pub text: String,
    pub title: Option<String>,
}

impl EmbeddedText {
    /// Non-whitespace characters per page
    pub fn density(&self) -> f64 {
        if self.pages == 0 {
            return 0.0;
        }
        let chars = self.text.chars().filter(|c| !c.is_whitespace()).count();
        chars as f64 / self.pages as f64
    }
}

/// Read the text layer page by page. Unreadable files give zero pages.
pub fn extract_embedded(bytes: &[u8]) -> EmbeddedText {
    let document = match Document::load_mem(bytes) {
        Ok(document) => document,
        Err(e) => {
            debug!("PDF could not be parsed: {}", e);
            return EmbeddedText::default();
        }
    };

    let pages = document.get_pages();
    let mut text = String::new();
    for number in pages.keys() {
        match document.extract_text(&[*number]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => debug!("No text on PDF page {}: {}", number, e),
        }
    }

    EmbeddedText {
        pages: pages.len(),
        text: utils::text::normalize_whitespace(&text),
        title: info_title(&document),
    }
}

fn info_title(document: &Document) -> Option<String> {
    let info = document.trailer.get(b"Info").ok()?;
    let dictionary = match info {
        Object::Reference(id) => document.get_dictionary(*id).ok()?,
        Object::Dictionary(dictionary) => dictionary,
        _ => return None,
    };
    let raw = dictionary.get(b"Title").ok()?.as_str().ok()?;
    let title = utils::text::squash_whitespace(&decode_pdf_string(raw));
    (!title.is_empty()).then_some(title)
}

/// PDF text strings are UTF-16BE with a BOM or PDFDocEncoding (read as Latin-1).
fn decode_pdf_string(raw: &[u8]) -> String {
    if let Some(utf16) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    raw.iter().map(|&b| b as char).collect()
}

pub fn into_content(
    doc: &FetchedDocument,
    metadata_title: Option<String>,
    text: String,
    via_recognition: bool,
) -> ExtractedContent {
    let body_text = utils::text::normalize_whitespace(&text);
    let title = metadata_title
        .or_else(|| {
            body_text
                .lines()
                .next()
                .filter(|line| line.chars().count() <= MAX_TITLE_CHARS)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            utils::url::extract_domain(&doc.final_url).unwrap_or_else(|| doc.final_url.clone())
        });

    ExtractedContent {
        source_url: doc.source_url.clone(),
        canonical_url: utils::url::normalize(&doc.final_url),
        title,
        body_text,
        published_at: None,
        source_name: resolve_source_name(None, &doc.final_url),
        extraction_method: if via_recognition {
            ExtractionMethod::FallbackParser
        } else {
            ExtractionMethod::PrimaryParser
        },
    }
}
