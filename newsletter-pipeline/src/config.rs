use crate::types::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix marking a credential that is read from the environment.
const ENV_PREFIX: &str = "env:";

/// Process-wide settings, loaded once per run and shared behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsletterConfig {
    pub document_title: String,
    /// Folder id inside a shared drive where the document is created.
    pub target_container: String,
    pub closing_text: String,
    pub sponsor_paragraph: Option<String>,
    pub style_guide_path: Option<PathBuf>,
    pub fetch: FetchConfig,
    /// Login settings keyed by domain, e.g. `[logins."valor.globo.com"]`.
    pub logins: HashMap<String, LoginConfig>,
    pub extraction: ExtractionConfig,
    pub generation: GenerationConfig,
    pub publish: PublishConfig,
}

impl Default for NewsletterConfig {
    fn default() -> Self {
        Self {
            document_title: "Newsletter".to_string(),
            target_container: String::new(),
            closing_text: "Gostou desta edição? Responda este e-mail com sugestões e encaminhe a newsletter para quem também acompanha o mercado.".to_string(),
            sponsor_paragraph: None,
            style_guide_path: None,
            fetch: FetchConfig::default(),
            logins: HashMap::new(),
            extraction: ExtractionConfig::default(),
            generation: GenerationConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    /// Timeout of a single HTTP attempt.
    pub timeout_seconds: u64,
    /// Budget for one link's fetch including retries; also applied to extraction.
    pub operation_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_document_size_mb: usize,
    pub max_redirects: usize,
    pub max_concurrency: usize,
    pub min_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; newsletter-pipeline/0.1)".to_string(),
            headers: BTreeMap::new(),
            timeout_seconds: 20,
            operation_timeout_seconds: 90,
            max_retries: 3,
            retry_delay_ms: 500,
            max_document_size_mb: 25,
            max_redirects: 10,
            max_concurrency: 4,
            min_host_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStrategy {
    /// One POST of username, password and fixed fields to `login_url`.
    #[default]
    Form,
    /// Identifier form then password form, starting at `login_url`.
    MultiStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub strategy: LoginStrategy,
    pub login_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub username_field: String,
    pub password_field: String,
    pub extra_fields: BTreeMap<String, String>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            strategy: LoginStrategy::Form,
            login_url: String::new(),
            username: None,
            password: None,
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            extra_fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Blocks with fewer words are treated as boilerplate.
    pub min_block_words: usize,
    /// Blocks whose linked text exceeds this share are treated as navigation.
    pub max_link_density: f64,
    /// Minimum body size for the structured strategy to count as a success.
    pub min_article_words: usize,
    /// Below this average the embedded PDF text layer is considered missing.
    pub min_pdf_chars_per_page: usize,
    pub ocr_enabled: bool,
    pub ocr_language: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_block_words: 8,
            max_link_density: 0.5,
            min_article_words: 50,
            min_pdf_chars_per_page: 200,
            ocr_enabled: true,
            ocr_language: "por+eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Attempts granted to the first available backend.
    pub max_attempts: u32,
    /// Attempts granted to each backend after the first.
    pub fallback_attempts: u32,
    /// Characters of each source excerpt embedded in a note or headline prompt.
    pub excerpt_chars: usize,
    /// Characters of each source excerpt embedded in the lead prompt.
    pub lead_excerpt_chars: usize,
    pub lead_min_words: usize,
    pub lead_max_words: usize,
    pub note_target_words: usize,
    pub note_tolerance: f64,
    pub headline_max_chars: usize,
    pub headline_symbol: String,
    /// Share of the numbers quoted in the excerpts a draft must keep, 0 to 1.
    pub numeric_fact_coverage: f64,
    pub request_timeout_seconds: u64,
    pub primary: Option<BackendConfig>,
    pub secondary: Option<BackendConfig>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fallback_attempts: 1,
            excerpt_chars: 4000,
            lead_excerpt_chars: 12000,
            lead_min_words: 400,
            lead_max_words: 600,
            note_target_words: 150,
            note_tolerance: 0.2,
            headline_max_chars: 60,
            headline_symbol: "▪".to_string(),
            numeric_fact_coverage: 1.0,
            request_timeout_seconds: 120,
            primary: None,
            secondary: None,
        }
    }
}

impl GenerationConfig {
    pub fn note_bounds(&self) -> (usize, usize) {
        let target = self.note_target_words as f64;
        let min = (target * (1.0 - self.note_tolerance)).round() as usize;
        let max = (target * (1.0 + self.note_tolerance)).round() as usize;
        (min, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub access_token: Option<String>,
    /// Requests per `documents.batchUpdate` call.
    pub batch_size: usize,
    pub drive_base_url: String,
    pub docs_base_url: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            batch_size: 50,
            drive_base_url: "https://www.googleapis.com".to_string(),
            docs_base_url: "https://docs.googleapis.com".to_string(),
        }
    }
}

impl NewsletterConfig {
    /// Read, resolve `env:` credentials and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: NewsletterConfig = toml::from_str(raw)?;
        config.resolve_credentials();
        config.validate()?;
        Ok(config)
    }

    fn resolve_credentials(&mut self) {
        for (domain, login) in self.logins.iter_mut() {
            login.username = resolve_credential(login.username.take());
            login.password = resolve_credential(login.password.take());
            if login.username.is_none() || login.password.is_none() {
                warn!(
                    "Login for {} has no usable credentials; its links are fetched anonymously",
                    domain
                );
            }
        }

        for backend in [&mut self.generation.primary, &mut self.generation.secondary]
            .into_iter()
            .flatten()
        {
            backend.api_key = resolve_credential(backend.api_key.take());
        }

        self.publish.access_token = resolve_credential(self.publish.access_token.take());
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation.primary.is_none() {
            return Err(PipelineError::Config(
                "[generation.primary] backend is required".to_string(),
            ));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "fetch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.generation.max_attempts == 0 {
            return Err(PipelineError::Config(
                "generation.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.generation.lead_min_words > self.generation.lead_max_words {
            return Err(PipelineError::Config(format!(
                "generation.lead_min_words ({}) exceeds lead_max_words ({})",
                self.generation.lead_min_words, self.generation.lead_max_words
            )));
        }
        if !(0.0..=1.0).contains(&self.generation.numeric_fact_coverage) {
            return Err(PipelineError::Config(format!(
                "generation.numeric_fact_coverage ({}) must be between 0 and 1",
                self.generation.numeric_fact_coverage
            )));
        }
        for (domain, login) in &self.logins {
            if login.login_url.is_empty() {
                return Err(PipelineError::Config(format!(
                    "login for {} has no login_url",
                    domain
                )));
            }
        }
        debug!(
            "Configuration valid: {} login domain(s), secondary backend {}",
            self.logins.len(),
            if self.generation.secondary.is_some() { "configured" } else { "absent" }
        );
        Ok(())
    }

    /// Login settings for a host, matching the host itself or any parent domain.
    pub fn login_for(&self, host: &str) -> Option<(&str, &LoginConfig)> {
        let host = host.trim_start_matches("www.");
        self.logins
            .iter()
            .filter(|(domain, _)| {
                let domain = domain.trim_start_matches("www.");
                host == domain || host.ends_with(&format!(".{}", domain))
            })
            .max_by_key(|(domain, _)| domain.len())
            .map(|(domain, login)| (domain.as_str(), login))
    }
}

/// Resolve a configured credential. `env:NAME` reads the variable; blank or
/// unset values are treated as absent.
pub fn resolve_credential(raw: Option<String>) -> Option<String> {
    let raw = raw?;
    let value = match raw.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var.trim()).ok()?,
        None => raw,
    };
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}
