#![allow(dead_code)]

use chrono::Utc;
use newsletter_pipeline::config::NewsletterConfig;
use newsletter_pipeline::prompt::Prompt;
use newsletter_pipeline::types::*;
use newsletter_pipeline::Backend;

const FILLER: &[&str] = &[
    "o", "mercado", "imobiliário", "acompanha", "os", "indicadores", "de", "demanda", "nas",
    "principais", "capitais", "enquanto", "incorporadoras", "ajustam", "estoques", "e", "preços",
    "ao", "novo", "ciclo",
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Config tuned for tests: no waiting between requests, short retry delays,
/// no OCR tooling.
pub fn test_config() -> NewsletterConfig {
    let mut config = NewsletterConfig::default();
    config.document_title = "Radar Imobiliário".to_string();
    config.target_container = "shared-folder-123".to_string();
    config.fetch.retry_delay_ms = 10;
    config.fetch.min_host_interval_ms = 0;
    config.fetch.timeout_seconds = 5;
    config.fetch.operation_timeout_seconds = 20;
    config.fetch.max_retries = 2;
    config.extraction.ocr_enabled = false;
    config
}

/// `n` filler words with no digits or markup.
pub fn filler(n: usize) -> String {
    (0..n)
        .map(|i| FILLER[i % FILLER.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn article_html(title: &str, site_name: &str, paragraphs: &[String]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>\n", p))
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>{title} | {site_name}</title>
  <meta property="og:title" content="{title}">
  <meta property="og:site_name" content="{site_name}">
  <meta property="article:published_time" content="2026-10-18T09:30:00Z">
</head>
<body>
  <nav><a href="/">Início</a> <a href="/mercado">Mercado</a> <a href="/assine">Assine</a></nav>
  <article>
    <h1>{title}</h1>
    {body}
  </article>
  <footer><p>Todos os direitos reservados. Proibida a reprodução sem autorização prévia do veículo.</p></footer>
</body>
</html>"#
    )
}

/// A three-paragraph article body quoting `fact`.
pub fn article_paragraphs(fact: &str) -> Vec<String> {
    vec![
        format!("As vendas de imóveis residenciais cresceram {} no trimestre segundo dados divulgados nesta semana pelo setor.", fact),
        filler(30),
        filler(25),
    ]
}

pub fn content(
    position: usize,
    url: &str,
    title: &str,
    body: &str,
    source: &str,
) -> SubmittedContent {
    SubmittedContent {
        position,
        content: ExtractedContent {
            source_url: url.to_string(),
            canonical_url: url.to_string(),
            title: title.to_string(),
            body_text: body.to_string(),
            published_at: None,
            source_name: source.to_string(),
            extraction_method: ExtractionMethod::PrimaryParser,
        },
    }
}

pub fn fetched(url: &str, content_type: ContentType, bytes: Vec<u8>) -> FetchedDocument {
    FetchedDocument {
        source_url: url.to_string(),
        final_url: url.to_string(),
        content_type,
        raw_bytes: bytes,
        status: FetchStatus::Ok,
        fetched_at: Utc::now(),
        http_status: Some(200),
    }
}

/// Text satisfying every house rule for the prompt's kind.
pub fn compliant_text(prompt: &Prompt) -> String {
    let citation = format!("({})", prompt.allowed_sources().join(", "));
    let fact = if prompt.numeric_facts.is_empty() {
        String::new()
    } else {
        format!(" com variação de {}", prompt.numeric_facts.join(", "))
    };

    match prompt.kind {
        TextKind::Lead => (0..5)
            .map(|i| {
                let extra = if i == 0 { fact.as_str() } else { "" };
                format!("{}{} {}.", filler(90), extra, citation)
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
        TextKind::DetailedNote => format!("{}{} {}.", filler(140), fact, citation),
        TextKind::Headline => format!("Mercado em alta {}", citation),
    }
}

/// Text breaking several rules at once.
pub fn broken_text(_prompt: &Prompt) -> String {
    "**Destaque**\n- item solto\n- outro item".to_string()
}

pub fn compliant_backend(name: &str) -> Backend {
    Backend::scripted(name, |prompt| Ok(compliant_text(prompt)))
}

pub fn broken_backend(name: &str) -> Backend {
    Backend::scripted(name, |prompt| Ok(broken_text(prompt)))
}

pub fn unavailable_backend(name: &str) -> Backend {
    let owned = name.to_string();
    Backend::scripted(name, move |_| {
        Err(GenerationError::BackendUnavailable {
            backend: owned.clone(),
            reason: "missing credential".to_string(),
        })
    })
}

/// Slice of `text` between UTF-16 offsets, as document services count them.
pub fn utf16_slice(text: &str, start: usize, end: usize) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    String::from_utf16_lossy(&units[start..end])
}
