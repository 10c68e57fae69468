mod common;

use common::*;
use newsletter_pipeline::config::{BackendConfig, GenerationConfig, Provider};
use newsletter_pipeline::prompt::Prompt;
use newsletter_pipeline::types::*;
use newsletter_pipeline::{Backend, BackendChain, StyleGuide};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_config(provider: Provider, model: &str, server: &MockServer) -> BackendConfig {
    BackendConfig {
        provider,
        model: model.to_string(),
        api_key: Some("secret-key".to_string()),
        base_url: Some(server.uri()),
        temperature: 0.4,
        max_tokens: 512,
    }
}

fn note_prompt() -> Prompt {
    let style = StyleGuide::from_config(&GenerationConfig::default(), None);
    let item = AssignedItem {
        position: 0,
        note: None,
        content: content(
            0,
            "https://exame.com/vendas",
            "Vendas crescem",
            "As vendas cresceram 12,5% no trimestre.",
            "Exame",
        )
        .content,
    };
    Prompt::build(
        &style,
        TextKind::DetailedNote,
        SectionName::SalesAndLeasing,
        &[item],
        4000,
        &HashMap::new(),
    )
}

#[tokio::test]
async fn test_openai_chat_completion() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer secret-key"))
        .and(body_string_contains("gpt-4o-mini"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Nota gerada (Exame).  " } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = Backend::from_config(
        &backend_config(Provider::OpenAi, "gpt-4o-mini", &server),
        Duration::from_secs(5),
    )
    .expect("backend with key");
    assert_eq!(backend.name(), "openai:gpt-4o-mini");

    let text = backend.generate(&note_prompt()).await?;
    assert_eq!(text, "Nota gerada (Exame).");
    Ok(())
}

#[tokio::test]
async fn test_gemini_generate_content() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .and(header("x-goog-api-key", "secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Nota " }, { "text": "gerada (Exame)." }] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = Backend::from_config(
        &backend_config(Provider::Gemini, "gemini-1.5-flash", &server),
        Duration::from_secs(5),
    )
    .expect("backend with key");

    let text = backend.generate(&note_prompt()).await?;
    assert_eq!(text, "Nota gerada (Exame).");
    Ok(())
}

#[tokio::test]
async fn test_rejected_credential_means_unavailable() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let backend = Backend::from_config(
        &backend_config(Provider::OpenAi, "gpt-4o-mini", &server),
        Duration::from_secs(5),
    )
    .expect("backend with key");

    let err = backend.generate(&note_prompt()).await.unwrap_err();
    assert!(matches!(err, GenerationError::BackendUnavailable { .. }));
    assert!(!err.to_string().contains("secret-key"));
}

#[tokio::test]
async fn test_server_error_is_a_backend_error() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let backend = Backend::from_config(
        &backend_config(Provider::OpenAi, "gpt-4o-mini", &server),
        Duration::from_secs(5),
    )
    .expect("backend with key");

    let err = backend.generate(&note_prompt()).await.unwrap_err();
    assert!(matches!(err, GenerationError::BackendError { .. }));
}

#[tokio::test]
async fn test_missing_content_is_a_backend_error() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let backend = Backend::from_config(
        &backend_config(Provider::OpenAi, "gpt-4o-mini", &server),
        Duration::from_secs(5),
    )
    .expect("backend with key");

    let err = backend.generate(&note_prompt()).await.unwrap_err();
    assert!(matches!(err, GenerationError::BackendError { .. }));
}

#[tokio::test]
async fn test_keyless_backends_are_skipped() {
    let server = MockServer::start().await;
    let mut keyless = backend_config(Provider::Gemini, "gemini-1.5-flash", &server);
    keyless.api_key = None;
    assert!(Backend::from_config(&keyless, Duration::from_secs(5)).is_none());

    let mut generation = GenerationConfig::default();
    generation.primary = Some(keyless);
    generation.secondary = Some(backend_config(Provider::OpenAi, "gpt-4o-mini", &server));
    let chain = BackendChain::from_config(&generation);

    let ordered: Vec<(String, bool)> =
        chain.ordered().into_iter().map(|(b, f)| (b.name(), f)).collect();
    assert_eq!(ordered, vec![("openai:gpt-4o-mini".to_string(), true)]);
    assert!(BackendChain::new().ordered().is_empty());
    assert!(BackendChain::new().is_empty());
}

#[test]
fn test_prompt_rendering() {
    let prompt = note_prompt().with_numeric_facts(vec!["12,5%".to_string()]);
    let rendered = prompt.render();

    assert!(rendered.contains("[SEÇÃO: Vendas e Locação | NOTA]"));
    assert!(rendered.contains("Fontes permitidas (cite pelo nome entre parênteses): Exame"));
    assert!(rendered.contains("12,5%"));
    assert!(rendered.contains("[1] Vendas crescem | https://exame.com/vendas (Exame)"));
    assert!(!rendered.contains("A versão anterior foi rejeitada"));

    let retry = prompt.with_feedback(&[newsletter_pipeline::style::Violation::ListStructure]);
    assert!(retry.render().contains("- não use listas ou marcadores"));
}
