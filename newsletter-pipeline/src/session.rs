use crate::config::{FetchConfig, LoginConfig, LoginStrategy};
use crate::types::AuthError;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Per-run cache of authenticated sessions, one per gated domain.
#[derive(Default)]
pub struct SessionCache {
    sessions: RwLock<HashMap<String, Arc<DomainSession>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the domain's session, creating it if absent. Creation happens
    /// under the write lock so two callers never get different sessions.
    pub async fn session_for(&self, domain: &str) -> Arc<DomainSession> {
        if let Some(session) = self.sessions.read().await.get(domain) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(domain.to_string())
            .or_insert_with(|| {
                debug!("Creating session slot for {}", domain);
                Arc::new(DomainSession::new(domain))
            })
            .clone()
    }

    /// Domains whose login failed during this run, with the reason.
    pub async fn disabled_domains(&self) -> Vec<(String, String)> {
        let sessions: Vec<Arc<DomainSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut disabled = Vec::new();
        for session in sessions {
            if let SessionState::Disabled(reason) = &*session.state.lock().await {
                disabled.push((session.domain.clone(), reason.clone()));
            }
        }
        disabled.sort();
        disabled
    }
}

pub enum SessionState {
    Unauthenticated,
    /// Client carrying the login cookies.
    Ready(Client),
    /// Login failed; every further link on the domain is excluded.
    Disabled(String),
}

pub struct DomainSession {
    pub domain: String,
    state: Mutex<SessionState>,
}

impl DomainSession {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    /// Lock the session. Holding the guard serializes fetches on the domain.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// Build a cookie-keeping client and log in with it.
pub async fn establish(
    domain: &str,
    login: &LoginConfig,
    fetch: &FetchConfig,
) -> std::result::Result<Client, AuthError> {
    let failed = |reason: String| AuthError::LoginFailed {
        domain: domain.to_string(),
        reason,
    };

    let (Some(username), Some(password)) = (login.username.as_deref(), login.password.as_deref())
    else {
        return Err(failed("no credentials configured".to_string()));
    };

    let client = Client::builder()
        .user_agent(&fetch.user_agent)
        .timeout(Duration::from_secs(fetch.timeout_seconds))
        .cookie_store(true)
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(fetch.max_redirects))
        .build()
        .map_err(|e| failed(format!("client setup failed: {}", e)))?;

    info!("Logging in to {} using {:?} strategy", domain, login.strategy);

    match login.strategy {
        LoginStrategy::Form => form_login(&client, login, username, password)
            .await
            .map_err(failed)?,
        LoginStrategy::MultiStep => multi_step_login(&client, login, username, password)
            .await
            .map_err(failed)?,
    }

    info!("Session established for {}", domain);
    Ok(client)
}

async fn form_login(
    client: &Client,
    login: &LoginConfig,
    username: &str,
    password: &str,
) -> std::result::Result<(), String> {
    let mut fields: Vec<(String, String)> = vec![
        (login.username_field.clone(), username.to_string()),
        (login.password_field.clone(), password.to_string()),
    ];
    fields.extend(login.extra_fields.iter().map(|(k, v)| (k.clone(), v.clone())));

    let response = client
        .post(&login.login_url)
        .form(&fields)
        .send()
        .await
        .map_err(|e| format!("login request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("login endpoint returned HTTP {}", status.as_u16()));
    }
    Ok(())
}

async fn multi_step_login(
    client: &Client,
    login: &LoginConfig,
    username: &str,
    password: &str,
) -> std::result::Result<(), String> {
    let (page_url, page) = get_page(client, &login.login_url).await?;
    let identifier_form = LoginForm::find(&page, &page_url, FieldRole::Identifier)
        .ok_or_else(|| "no identifier form on login page".to_string())?;
    debug!("Submitting identifier step to {}", identifier_form.action);

    let (next_url, next_page) = identifier_form
        .submit(client, username, &login.extra_fields)
        .await?;

    // Some providers render both fields on one page; reuse it then.
    let password_form = LoginForm::find(&next_page, &next_url, FieldRole::Password)
        .or_else(|| LoginForm::find(&page, &page_url, FieldRole::Password))
        .ok_or_else(|| "no password form after identifier step".to_string())?;
    debug!("Submitting password step to {}", password_form.action);

    password_form.submit(client, password, &login.extra_fields).await?;
    Ok(())
}

async fn get_page(client: &Client, url: &str) -> std::result::Result<(Url, String), String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("login page request failed: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("login page returned HTTP {}", response.status().as_u16()));
    }
    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| format!("login page unreadable: {}", e))?;
    Ok((final_url, body))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRole {
    Identifier,
    Password,
}

/// A login form located in a page: where it posts, its hidden fields and
/// the name of the field to fill.
#[derive(Debug)]
struct LoginForm {
    action: Url,
    method_post: bool,
    hidden: Vec<(String, String)>,
    target_field: String,
}

impl LoginForm {
    fn find(html: &str, base: &Url, role: FieldRole) -> Option<LoginForm> {
        let document = Html::parse_document(html);
        let Ok(form_sel) = Selector::parse("form") else {
            return None;
        };
        let Ok(input_sel) = Selector::parse("input") else {
            return None;
        };

        for form in document.select(&form_sel) {
            let inputs: Vec<ElementRef> = form.select(&input_sel).collect();
            let Some(target) = inputs.iter().find_map(|input| matches_role(input, role)) else {
                continue;
            };

            let hidden = inputs
                .iter()
                .filter(|input| {
                    input
                        .value()
                        .attr("type")
                        .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
                })
                .filter_map(|input| {
                    let name = input.value().attr("name")?;
                    Some((name.to_string(), input.value().attr("value").unwrap_or("").to_string()))
                })
                .collect();

            let action = form
                .value()
                .attr("action")
                .filter(|a| !a.trim().is_empty())
                .and_then(|a| base.join(a.trim()).ok())
                .unwrap_or_else(|| base.clone());
            let method_post = form
                .value()
                .attr("method")
                .map(|m| !m.eq_ignore_ascii_case("get"))
                .unwrap_or(true);

            return Some(LoginForm {
                action,
                method_post,
                hidden,
                target_field: target,
            });
        }
        None
    }

    async fn submit(
        &self,
        client: &Client,
        value: &str,
        extra: &std::collections::BTreeMap<String, String>,
    ) -> std::result::Result<(Url, String), String> {
        let mut fields = self.hidden.clone();
        fields.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields.push((self.target_field.clone(), value.to_string()));

        let request = if self.method_post {
            client.post(self.action.clone()).form(&fields)
        } else {
            client.get(self.action.clone()).query(&fields)
        };
        let response = request
            .send()
            .await
            .map_err(|e| format!("login step failed: {}", e))?;
        if !response.status().is_success() {
            warn!("Login step at {} returned HTTP {}", self.action, response.status().as_u16());
            return Err(format!("login step returned HTTP {}", response.status().as_u16()));
        }
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| format!("login step response unreadable: {}", e))?;
        Ok((final_url, body))
    }
}

fn matches_role(input: &ElementRef, role: FieldRole) -> Option<String> {
    let name = input.value().attr("name")?;
    let lowered = name.to_lowercase();
    let input_type = input.value().attr("type").unwrap_or("text").to_lowercase();

    let hit = match role {
        FieldRole::Identifier => {
            input_type == "email"
                || ["email", "login", "username", "user", "identifier"]
                    .iter()
                    .any(|key| lowered == *key || lowered.ends_with(&format!("[{}]", key)))
        }
        FieldRole::Password => {
            input_type == "password" || lowered.contains("password") || lowered.contains("senha")
        }
    };
    hit.then(|| name.to_string())
}
