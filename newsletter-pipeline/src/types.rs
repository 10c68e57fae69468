use crate::style::Violation;
use serde::{Deserialize, Serialize};

// Use the interfaces crate for the shared content model
pub use interfaces::defs::{
    AssignedItem, Citation, Compliance, ContentType, DocumentSection, ExtractedContent,
    ExtractionMethod, FetchFailure, FetchFailureKind, FetchStatus, FetchedDocument,
    GeneratedSectionText, HintOrigin, NewsletterDocument, PublishOperation, PublishOperationSet,
    SectionAssignment, SectionHint, SectionName, SourceLink, SubmittedContent, TextKind,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn transient(url: &str, reason: impl Into<String>) -> Self {
        FetchError::Transient {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn permanent(url: &str, reason: impl Into<String>) -> Self {
        FetchError::Permanent {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn kind(&self) -> FetchFailureKind {
        match self {
            FetchError::Transient { .. } => FetchFailureKind::Transient,
            FetchError::Permanent { .. } => FetchFailureKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("login failed for {domain}: {reason}")]
    LoginFailed { domain: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no usable text extracted from {url}")]
    EmptyContent { url: String },

    #[error("unsupported content type '{content_type}' at {url}")]
    UnsupportedFormat { url: String, content_type: String },
}

impl ExtractionError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExtractionError::EmptyContent { .. } => "empty_content",
            ExtractionError::UnsupportedFormat { .. } => "unsupported_format",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("draft violates {} constraint(s)", violations.len())]
    ConstraintViolation { violations: Vec<Violation> },

    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("backend {backend} failed: {reason}")]
    BackendError { backend: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PublishError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid target container: {0}")]
    InvalidContainer(String),

    #[error("document service returned {status}: {message}")]
    Service { status: u16, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
