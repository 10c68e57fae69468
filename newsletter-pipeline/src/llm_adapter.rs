use crate::config::{BackendConfig, GenerationConfig, Provider};
use crate::prompt::Prompt;
use crate::types::GenerationError;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Pure function over a prompt, used for offline runs and tests.
pub type ScriptFn = dyn Fn(&Prompt) -> std::result::Result<String, GenerationError> + Send + Sync;

/// Connection settings shared by the HTTP providers.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// A generative backend, identified by provider.
#[derive(Clone)]
pub enum Backend {
    OpenAi(HttpBackend),
    Gemini(HttpBackend),
    Scripted { name: String, script: Arc<ScriptFn> },
}

impl Backend {
    /// Build a backend from config. `None` when its credential is absent.
    pub fn from_config(config: &BackendConfig, timeout: Duration) -> Option<Backend> {
        let Some(api_key) = config.api_key.clone() else {
            warn!("No API key for {:?} backend {}; skipping it", config.provider, config.model);
            return None;
        };

        let client = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Could not build HTTP client for {}: {}", config.model, e);
                return None;
            }
        };

        let default_base = match config.provider {
            Provider::OpenAi => OPENAI_BASE_URL,
            Provider::Gemini => GEMINI_BASE_URL,
        };
        let http = HttpBackend {
            client,
            model: config.model.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        Some(match config.provider {
            Provider::OpenAi => Backend::OpenAi(http),
            Provider::Gemini => Backend::Gemini(http),
        })
    }

    pub fn scripted<F>(name: impl Into<String>, script: F) -> Backend
    where
        F: Fn(&Prompt) -> std::result::Result<String, GenerationError> + Send + Sync + 'static,
    {
        Backend::Scripted {
            name: name.into(),
            script: Arc::new(script),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Backend::OpenAi(http) => format!("openai:{}", http.model),
            Backend::Gemini(http) => format!("gemini:{}", http.model),
            Backend::Scripted { name, .. } => format!("scripted:{}", name),
        }
    }

    pub async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, GenerationError> {
        debug!("Calling {} for {:?} in {}", self.name(), prompt.kind, prompt.section);
        let text = match self {
            Backend::OpenAi(http) => self.call_openai(http, prompt).await?,
            Backend::Gemini(http) => self.call_gemini(http, prompt).await?,
            Backend::Scripted { script, .. } => script(prompt)?,
        };
        Ok(text.trim().to_string())
    }

    async fn call_openai(
        &self,
        http: &HttpBackend,
        prompt: &Prompt,
    ) -> std::result::Result<String, GenerationError> {
        let body = json!({
            "model": http.model,
            "temperature": http.temperature,
            "max_tokens": http.max_tokens,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.render() },
            ],
        });

        let response = http
            .client
            .post(format!("{}/chat/completions", http.base_url))
            .bearer_auth(&http.api_key)
            .json(&body)
            .send()
            .await;
        let value = self.read_json(response).await?;

        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.error("response has no message content"))
    }

    async fn call_gemini(
        &self,
        http: &HttpBackend,
        prompt: &Prompt,
    ) -> std::result::Result<String, GenerationError> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": prompt.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt.render() }] }],
            "generationConfig": {
                "temperature": http.temperature,
                "maxOutputTokens": http.max_tokens,
            },
        });

        let response = http
            .client
            .post(format!("{}/models/{}:generateContent", http.base_url, http.model))
            .header("x-goog-api-key", &http.api_key)
            .json(&body)
            .send()
            .await;
        let value = self.read_json(response).await?;

        let parts = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| self.error("response has no candidate content"))?;
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        Ok(text)
    }

    async fn read_json(
        &self,
        response: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> std::result::Result<Value, GenerationError> {
        let response = response.map_err(|e| {
            if e.is_connect() {
                GenerationError::BackendUnavailable {
                    backend: self.name(),
                    reason: e.to_string(),
                }
            } else {
                self.error(&e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GenerationError::BackendUnavailable {
                backend: self.name(),
                reason: format!("credential rejected (HTTP {})", status.as_u16()),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.error(&format!(
                "HTTP {}: {}",
                status.as_u16(),
                crate::utils::text::smart_truncate(&detail, 200)
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| self.error(&format!("invalid JSON: {}", e)))
    }

    fn error(&self, reason: &str) -> GenerationError {
        GenerationError::BackendError {
            backend: self.name(),
            reason: reason.to_string(),
        }
    }
}

/// Ordered backends: the primary, then the secondary fallback.
#[derive(Clone, Default)]
pub struct BackendChain {
    primary: Option<Backend>,
    secondary: Option<Backend>,
}

impl BackendChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_seconds);
        let chain = Self {
            primary: config.primary.as_ref().and_then(|c| Backend::from_config(c, timeout)),
            secondary: config.secondary.as_ref().and_then(|c| Backend::from_config(c, timeout)),
        };
        info!(
            "Generative backends: primary {}, secondary {}",
            chain.primary.as_ref().map(Backend::name).unwrap_or_else(|| "unavailable".to_string()),
            chain.secondary.as_ref().map(Backend::name).unwrap_or_else(|| "unavailable".to_string())
        );
        chain
    }

    pub fn with_primary(mut self, backend: Backend) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn with_secondary(mut self, backend: Backend) -> Self {
        self.secondary = Some(backend);
        self
    }

    /// Available backends in fallback order; the flag marks fallbacks.
    pub fn ordered(&self) -> Vec<(&Backend, bool)> {
        let mut ordered = Vec::new();
        if let Some(primary) = &self.primary {
            ordered.push((primary, false));
        }
        if let Some(secondary) = &self.secondary {
            ordered.push((secondary, true));
        }
        ordered
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }
}
