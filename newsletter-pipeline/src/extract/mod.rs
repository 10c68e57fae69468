//! Turns fetched bytes into the canonical content model.

pub mod html;
pub mod ocr;
pub mod pdf;

use crate::config::ExtractionConfig;
use crate::traits::TextRecognizer;
use crate::types::{ContentType, ExtractedContent, ExtractionError, FetchedDocument};
use crate::utils;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Editorial names of outlets the newsroom cites most.
const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("valor.globo.com", "Valor Econômico"),
    ("oglobo.globo.com", "O Globo"),
    ("g1.globo.com", "G1"),
    ("estadao.com.br", "Estadão"),
    ("folha.uol.com.br", "Folha de S.Paulo"),
    ("exame.com", "Exame"),
    ("infomoney.com.br", "InfoMoney"),
    ("cnnbrasil.com.br", "CNN Brasil"),
    ("imobireport.com.br", "Imobi Report"),
];

/// Editorial name for a host, matching subdomains of known outlets.
pub fn known_source_name(host: &str) -> Option<&'static str> {
    let host = host.trim_start_matches("www.").to_lowercase();
    KNOWN_SOURCES
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, name)| *name)
}

/// Source name from page metadata, then the known-outlet table, then the domain.
pub fn resolve_source_name(metadata_name: Option<&str>, url: &str) -> String {
    if let Some(name) = metadata_name.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let host = utils::url::extract_domain(url).unwrap_or_default();
    known_source_name(&host)
        .map(str::to_string)
        .unwrap_or_else(|| utils::url::pretty_domain_name(&host))
}

pub struct Extractor {
    config: ExtractionConfig,
    recognizer: Option<Arc<dyn TextRecognizer>>,
}

impl Extractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            recognizer: None,
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Extract the article behind a successfully fetched document.
    /// Deterministic for identical bytes and URLs.
    pub async fn extract(
        &self,
        doc: &FetchedDocument,
    ) -> std::result::Result<ExtractedContent, ExtractionError> {
        if !doc.is_ok() || doc.raw_bytes.is_empty() {
            return Err(ExtractionError::EmptyContent {
                url: doc.source_url.clone(),
            });
        }

        let content = match &doc.content_type {
            ContentType::Html => html::extract_html(doc, &self.config)?,
            ContentType::Pdf => self.extract_pdf(doc).await?,
            ContentType::Other(kind) => {
                return Err(ExtractionError::UnsupportedFormat {
                    url: doc.source_url.clone(),
                    content_type: if kind.is_empty() {
                        "unknown".to_string()
                    } else {
                        kind.clone()
                    },
                });
            }
        };

        info!(
            "Extracted {} words from {} via {:?} (source: {})",
            utils::text::word_count(&content.body_text),
            doc.source_url,
            content.extraction_method,
            content.source_name
        );
        Ok(content)
    }

    async fn extract_pdf(
        &self,
        doc: &FetchedDocument,
    ) -> std::result::Result<ExtractedContent, ExtractionError> {
        let embedded = pdf::extract_embedded(&doc.raw_bytes);
        let dense_enough = embedded.pages > 0
            && embedded.density() >= self.config.min_pdf_chars_per_page as f64;

        if dense_enough {
            return Ok(pdf::into_content(doc, embedded.title, embedded.text, false));
        }

        debug!(
            "PDF {} has {:.0} chars/page over {} page(s); trying recognition",
            doc.source_url,
            embedded.density(),
            embedded.pages
        );

        let recognized = match (&self.recognizer, self.config.ocr_enabled) {
            (Some(recognizer), true) => match recognizer.recognize_pdf(&doc.raw_bytes).await {
                Ok(text) => utils::text::normalize_whitespace(&text),
                Err(e) => {
                    warn!("{} failed on {}: {}", recognizer.recognizer_name(), doc.source_url, e);
                    String::new()
                }
            },
            _ => String::new(),
        };

        if !recognized.is_empty() {
            return Ok(pdf::into_content(doc, embedded.title, recognized, true));
        }
        if !embedded.text.is_empty() {
            // Sparse text layer beats nothing
            return Ok(pdf::into_content(doc, embedded.title, embedded.text, false));
        }

        Err(ExtractionError::EmptyContent {
            url: doc.source_url.clone(),
        })
    }
}
