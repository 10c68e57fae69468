use crate::config::PublishConfig;
use crate::traits::{DocumentPublisher, PublishedDocument};
use crate::types::{PublishError, PublishOperation, PublishOperationSet, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

const DOCUMENT_MIME_TYPE: &str = "application/vnd.google-apps.document";

/// Containers that resolve to a personal root, where creation fails for
/// service identities without storage of their own.
const PRIVATE_ROOTS: &[&str] = &["root", "my drive", "meu drive"];

/// "<title> — 2026-10-19 09.30"
pub fn document_name<Tz: TimeZone>(title: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{} — {}", title.trim(), at.format("%Y-%m-%d %H.%M"))
}

/// Reject empty or private-root containers before any request is made.
pub fn check_container(container: &str) -> std::result::Result<&str, PublishError> {
    let container = container.trim();
    if container.is_empty() {
        return Err(PublishError::InvalidContainer(
            "no target folder configured".to_string(),
        ));
    }
    if PRIVATE_ROOTS.contains(&container.to_lowercase().as_str()) {
        return Err(PublishError::InvalidContainer(format!(
            "'{}' is a private root; use a folder inside a shared drive",
            container
        )));
    }
    Ok(container)
}

/// Google Drive + Docs over REST with a bearer token.
pub struct GoogleDocsPublisher {
    client: Client,
    access_token: Option<String>,
    drive_base_url: String,
    docs_base_url: String,
    batch_size: usize,
}

impl GoogleDocsPublisher {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            access_token: config.access_token.clone(),
            drive_base_url: config.drive_base_url.trim_end_matches('/').to_string(),
            docs_base_url: config.docs_base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
        })
    }

    fn token(&self) -> std::result::Result<&str, PublishError> {
        self.access_token.as_deref().ok_or_else(|| {
            PublishError::PermissionDenied("no access token configured".to_string())
        })
    }

    async fn create_document(
        &self,
        title: &str,
        container: &str,
    ) -> std::result::Result<String, PublishError> {
        let body = json!({
            "name": title,
            "mimeType": DOCUMENT_MIME_TYPE,
            "parents": [container],
        });
        let response = self
            .client
            .post(format!("{}/drive/v3/files", self.drive_base_url))
            .query(&[("supportsAllDrives", "true"), ("fields", "id")])
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await;
        let value = read_response(response).await?;

        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PublishError::Service {
                status: 200,
                message: "file created without an id".to_string(),
            })
    }

    async fn batch_update(
        &self,
        document_id: &str,
        requests: &[Value],
    ) -> std::result::Result<(), PublishError> {
        let response = self
            .client
            .post(format!("{}/v1/documents/{}:batchUpdate", self.docs_base_url, document_id))
            .bearer_auth(self.token()?)
            .json(&json!({ "requests": requests }))
            .send()
            .await;
        read_response(response).await.map(|_| ())
    }
}

#[async_trait]
impl DocumentPublisher for GoogleDocsPublisher {
    fn publisher_name(&self) -> String {
        "google-docs".to_string()
    }

    async fn publish(
        &self,
        title: &str,
        container: &str,
        operations: &PublishOperationSet,
    ) -> std::result::Result<PublishedDocument, PublishError> {
        let container = check_container(container)?;
        self.token()?;

        let name = document_name(title, &Local::now());
        info!("Creating document '{}' in folder {}", name, container);
        let document_id = self.create_document(&name, container).await?;

        let requests: Vec<Value> = operations.operations.iter().map(to_request).collect();
        let batches = requests.chunks(self.batch_size);
        let total = batches.len();
        for (idx, batch) in batches.enumerate() {
            debug!("Applying batch {}/{} ({} request(s))", idx + 1, total, batch.len());
            self.batch_update(&document_id, batch).await?;
        }

        let url = format!("https://docs.google.com/document/d/{}/edit", document_id);
        info!("Published {} operation(s) to {}", requests.len(), url);
        Ok(PublishedDocument { document_id, url })
    }
}

/// Docs API request for one planned operation.
pub fn to_request(operation: &PublishOperation) -> Value {
    match operation {
        PublishOperation::InsertText { index, text } => json!({
            "insertText": { "location": { "index": index }, "text": text }
        }),
        PublishOperation::ApplyBold { start, end } => json!({
            "updateTextStyle": {
                "range": { "startIndex": start, "endIndex": end },
                "textStyle": { "bold": true },
                "fields": "bold",
            }
        }),
        PublishOperation::InsertLink { start, end, url } => json!({
            "updateTextStyle": {
                "range": { "startIndex": start, "endIndex": end },
                "textStyle": { "link": { "url": url } },
                "fields": "link",
            }
        }),
    }
}

async fn read_response(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> std::result::Result<Value, PublishError> {
    let response = response.map_err(|e| PublishError::Service {
        status: 0,
        message: e.to_string(),
    })?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    if !(200..300).contains(&status) {
        let err = map_error(status, &body);
        error!("Document service rejected the request: {}", err);
        return Err(err);
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| PublishError::Service {
        status,
        message: format!("invalid JSON: {}", e),
    })
}

/// Translate a Drive/Docs error body into the publish taxonomy.
pub fn map_error(status: u16, body: &str) -> PublishError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let reasons: Vec<String> = value
        .pointer("/error/errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("reason").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let has_reason = |needle: &str| reasons.iter().any(|r| r.eq_ignore_ascii_case(needle));

    if has_reason("storageQuotaExceeded")
        || has_reason("quotaExceeded")
        || message.to_lowercase().contains("storage quota")
    {
        PublishError::QuotaExceeded(message)
    } else if status == 404 || has_reason("notFound") {
        PublishError::InvalidContainer(message)
    } else if status == 401 || status == 403 {
        PublishError::PermissionDenied(message)
    } else {
        PublishError::Service { status, message }
    }
}
