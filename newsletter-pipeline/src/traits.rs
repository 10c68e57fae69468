use crate::types::{PublishError, PublishOperationSet, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Recognises text from page images when a PDF carries no usable text layer.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Human-readable name for logs
    fn recognizer_name(&self) -> String;

    /// Recognise the text of every page of `pdf_bytes`.
    /// Returns an empty string when nothing could be recognised.
    async fn recognize_pdf(&self, pdf_bytes: &[u8]) -> Result<String>;
}

/// External document service that receives the planned operations.
#[async_trait]
pub trait DocumentPublisher: Send + Sync {
    fn publisher_name(&self) -> String;

    /// Create a document named `title` inside `container` and apply
    /// `operations` in order. Failures are never retried.
    async fn publish(
        &self,
        title: &str,
        container: &str,
        operations: &PublishOperationSet,
    ) -> std::result::Result<PublishedDocument, PublishError>;
}

/// Where a published document ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedDocument {
    pub document_id: String,
    pub url: String,
}
