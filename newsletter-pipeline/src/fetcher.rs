use crate::config::{LoginConfig, NewsletterConfig};
use crate::session::{self, SessionCache, SessionState};
use crate::types::{
    ContentType, FetchError, FetchFailureKind, FetchStatus, FetchedDocument, Result, SourceLink,
};
use crate::utils;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

/// Body of a successful GET, before content-type detection.
struct RawResponse {
    final_url: String,
    http_status: u16,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

pub struct Fetcher {
    client: Client,
    config: Arc<NewsletterConfig>,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: Arc<NewsletterConfig>) -> Result<Self> {
        let fetch = &config.fetch;
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &fetch.headers {
            match (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Ignoring invalid fetch header '{}'", name),
            }
        }

        let client = Client::builder()
            .user_agent(&fetch.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(fetch.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(fetch.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Fetch one link. Never fails: problems are reported in the returned
    /// document's status so one bad link cannot stop the run.
    ///
    /// The operation timeout covers login and GET work only. Waiting for the
    /// domain's session behind other links is not counted.
    pub async fn fetch(&self, link: &SourceLink, sessions: &SessionCache) -> FetchedDocument {
        let url = link.url.trim();
        if !utils::url::is_fetchable(url) {
            let reason = match Url::parse(url) {
                Ok(parsed) => format!("unsupported URL scheme '{}'", parsed.scheme()),
                Err(e) => format!("malformed URL: {}", e),
            };
            return failure(url, &FetchError::permanent(url, reason));
        }
        let host = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
            .unwrap_or_default();

        let Some((domain, login)) = self.config.login_for(&host) else {
            let fetched = async { self.finish(url, self.get_with_retry(&self.client, url).await) };
            return self.within_budget(url, fetched).await;
        };

        // Holding the session lock for the whole fetch serializes the domain.
        let session = sessions.session_for(domain).await;
        let mut state = session.lock().await;
        self.within_budget(url, self.fetch_with_session(url, domain, login, &mut state))
            .await
    }

    async fn within_budget(
        &self,
        url: &str,
        work: impl Future<Output = FetchedDocument>,
    ) -> FetchedDocument {
        let budget = Duration::from_secs(self.config.fetch.operation_timeout_seconds);
        match tokio::time::timeout(budget, work).await {
            Ok(document) => document,
            Err(_) => {
                warn!("Fetch of {} exceeded {:?}", url, budget);
                FetchedDocument::failed(
                    url,
                    FetchFailureKind::Transient,
                    format!("operation timed out after {}s", budget.as_secs()),
                )
            }
        }
    }

    async fn fetch_with_session(
        &self,
        url: &str,
        domain: &str,
        login: &LoginConfig,
        state: &mut SessionState,
    ) -> FetchedDocument {
        if matches!(*state, SessionState::Unauthenticated) {
            match session::establish(domain, login, &self.config.fetch).await {
                Ok(client) => *state = SessionState::Ready(client),
                Err(e) => {
                    error!("{}; disabling {} for this run", e, domain);
                    *state = SessionState::Disabled(e.to_string());
                }
            }
        }

        match &*state {
            SessionState::Ready(client) => {
                debug!("Fetching {} with {} session", url, domain);
                let result = self.get_with_retry(client, url).await;
                self.finish(url, result)
            }
            SessionState::Disabled(reason) => {
                FetchedDocument::failed(url, FetchFailureKind::Auth, reason.clone())
            }
            SessionState::Unauthenticated => FetchedDocument::failed(
                url,
                FetchFailureKind::Auth,
                format!("no session for {}", domain),
            ),
        }
    }

    fn finish(
        &self,
        url: &str,
        result: std::result::Result<RawResponse, FetchError>,
    ) -> FetchedDocument {
        match result {
            Ok(raw) => {
                let content_type = detect_content_type(raw.content_type.as_deref(), &raw.bytes);
                info!(
                    "Fetched {} ({} bytes, {:?}, HTTP {})",
                    url,
                    raw.bytes.len(),
                    content_type,
                    raw.http_status
                );
                FetchedDocument {
                    source_url: url.to_string(),
                    final_url: raw.final_url,
                    content_type,
                    raw_bytes: raw.bytes,
                    status: FetchStatus::Ok,
                    fetched_at: Utc::now(),
                    http_status: Some(raw.http_status),
                }
            }
            Err(e) => failure(url, &e),
        }
    }

    /// GET with exponential backoff. Only transient failures are retried.
    async fn get_with_retry(
        &self,
        client: &Client,
        url: &str,
    ) -> std::result::Result<RawResponse, FetchError> {
        let fetch = &self.config.fetch;
        let initial = Duration::from_millis(fetch.retry_delay_ms);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: initial * 32,
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            self.apply_rate_limit(url).await;
            debug!("GET {} (attempt {})", url, attempt + 1);

            let error = match client.get(url).send().await {
                Ok(response) => match self.read_response(url, response).await {
                    Ok(raw) => return Ok(raw),
                    Err(e) => e,
                },
                Err(e) => classify_request_error(url, &e),
            };

            if !error.is_transient() || attempt >= fetch.max_retries {
                if error.is_transient() {
                    error!("Giving up on {} after {} attempts: {}", url, attempt + 1, error);
                } else {
                    warn!("Permanent failure for {}: {}", url, error);
                }
                return Err(error);
            }

            let delay = backoff.next_backoff().unwrap_or(initial);
            warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt + 1, url, delay, error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn read_response(
        &self,
        url: &str,
        response: Response,
    ) -> std::result::Result<RawResponse, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let reason = format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            );
            return Err(if is_transient_status(status) {
                FetchError::transient(url, reason)
            } else {
                FetchError::permanent(url, reason)
            });
        }

        let limit = self.config.fetch.max_document_size_mb * 1024 * 1024;
        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(FetchError::permanent(
                    url,
                    format!("document too large: {} bytes", length),
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(url, format!("body read failed: {}", e)))?;
        if bytes.len() > limit {
            return Err(FetchError::permanent(
                url,
                format!("document too large: {} bytes", bytes.len()),
            ));
        }

        Ok(RawResponse {
            final_url,
            http_status: status.as_u16(),
            content_type,
            bytes: bytes.to_vec(),
        })
    }

    /// Keep a minimum interval between requests to the same host.
    async fn apply_rate_limit(&self, url: &str) {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
            return;
        };
        let min_interval = Duration::from_millis(self.config.fetch.min_host_interval_ms);
        if min_interval.is_zero() {
            return;
        }

        // Reserve the next slot under the lock, sleep outside it.
        let wait = {
            let mut rate_limiter = self.rate_limiter.write().await;
            let now = Instant::now();
            let slot = match rate_limiter.get(&host) {
                Some(last) if *last + min_interval > now => *last + min_interval,
                _ => now,
            };
            rate_limiter.insert(host.clone(), slot);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }
    }
}

fn failure(url: &str, error: &FetchError) -> FetchedDocument {
    let reason = match error {
        FetchError::Transient { reason, .. } | FetchError::Permanent { reason, .. } => {
            reason.clone()
        }
    };
    FetchedDocument::failed(url, error.kind(), reason)
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_request_error(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_redirect() || e.is_builder() {
        FetchError::permanent(url, e.to_string())
    } else {
        // Timeouts, refused connections and resets
        FetchError::transient(url, e.to_string())
    }
}

/// Content type from the response header, overridden by magic bytes when
/// the header is missing or wrong.
pub fn detect_content_type(header: Option<&str>, bytes: &[u8]) -> ContentType {
    if looks_like_pdf(bytes) {
        return ContentType::Pdf;
    }

    let header = header.map(|h| h.to_ascii_lowercase()).unwrap_or_default();
    if header.contains("html") || header.contains("xhtml") {
        return ContentType::Html;
    }
    if looks_like_html(bytes) {
        return ContentType::Html;
    }
    // Includes a PDF header whose bytes lack the magic number
    ContentType::Other(header)
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5).any(|w| w == b"%PDF-")
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<html")
}
