//! Session authentication and CSRF token management.
//!
//! TimeTree's web backend uses a Rails-style session: a `_session_id` cookie
//! (owned by the HTTP client's cookie jar) plus a CSRF token scraped from the
//! signin page. The token obtained before login is only valid for the login
//! request itself; the server rotates it afterwards, so a fresh one is
//! fetched once the credentials are accepted.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::TimeTreeError;

pub(crate) const SIGNIN_PAGE: &str = "/signin";
pub(crate) const SIGNIN_ENDPOINT: &str = "/api/v1/auth/email/signin";
pub(crate) const VALIDATE_ENDPOINT: &str = "/api/v1/auths";

const HEADER_CSRF: HeaderName = HeaderName::from_static("x-csrf-token");
const HEADER_APP: HeaderName = HeaderName::from_static("x-timetreea");
const APP_ID: &str = "web/2.1.0/de";

#[allow(clippy::expect_used)]
static CSRF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+name="csrf-token"\s+content="([^"]+)""#)
        .expect("CSRF regex should be valid")
});

#[derive(Debug, Default)]
struct AuthState {
    csrf_token: Option<String>,
    authenticated: bool,
}

/// Manages the TimeTree session state machine.
///
/// Lifecycle: unauthenticated → CSRF fetched → credentials submitted →
/// CSRF re-fetched → authenticated. A 401/403 on any later request moves the
/// state back to unauthenticated via [`SessionAuth::mark_unauthenticated`].
pub struct SessionAuth {
    http: reqwest::Client,
    base_url: String,
    device_uuid: String,
    state: Mutex<AuthState>,
}

impl SessionAuth {
    /// `http` must carry a cookie jar; the session cookie lives there.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            device_uuid: Uuid::new_v4().simple().to_string(),
            state: Mutex::new(AuthState::default()),
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.authenticated
    }

    /// Perform the full login flow.
    #[instrument(skip(self, password), level = "info")]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(), TimeTreeError> {
        self.fetch_csrf_token().await?;
        self.submit_credentials(email, password).await?;
        // The server rotates the CSRF token after login; fetch a fresh one.
        self.fetch_csrf_token().await?;
        self.state.lock().await.authenticated = true;
        Ok(())
    }

    /// Check whether the current session cookie is still valid.
    #[instrument(skip(self), level = "info")]
    pub async fn validate_session(&self) -> Result<(), TimeTreeError> {
        let headers = self.session_headers().await?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, VALIDATE_ENDPOINT))
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        let mut state = self.state.lock().await;
        if status.as_u16() == 200 {
            state.authenticated = true;
            Ok(())
        } else {
            state.authenticated = false;
            Err(TimeTreeError::Authentication(format!(
                "Session validation failed: HTTP {}",
                status.as_u16()
            )))
        }
    }

    /// Build headers for an API request.
    ///
    /// The CSRF header is only attached for mutating verbs; the app
    /// identifier goes on every call.
    pub async fn headers(&self, mutating: bool) -> Result<HeaderMap, TimeTreeError> {
        let state = self.state.lock().await;
        let token = match (&state.csrf_token, state.authenticated) {
            (Some(token), true) => token.clone(),
            _ => {
                return Err(TimeTreeError::Authentication(
                    "Not authenticated. Call authenticate() first.".to_string(),
                ))
            }
        };
        drop(state);

        let mut headers = base_headers();
        if mutating {
            headers.insert(HEADER_CSRF, header_value(&token)?);
        }
        Ok(headers)
    }

    /// Mark the session as no longer authenticated (e.g. after a 401).
    pub async fn mark_unauthenticated(&self) {
        self.state.lock().await.authenticated = false;
    }

    /// Base headers plus the CSRF token when one is held, regardless of the
    /// authenticated flag. Used during the login flow itself.
    async fn session_headers(&self) -> Result<HeaderMap, TimeTreeError> {
        let mut headers = base_headers();
        if let Some(token) = self.state.lock().await.csrf_token.clone() {
            headers.insert(HEADER_CSRF, header_value(&token)?);
        }
        Ok(headers)
    }

    /// GET /signin and extract the CSRF token from the HTML meta tag.
    async fn fetch_csrf_token(&self) -> Result<(), TimeTreeError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, SIGNIN_PAGE))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(TimeTreeError::Authentication(format!(
                "Failed to load signin page: HTTP {}",
                status.as_u16()
            )));
        }

        let html = response.text().await?;
        let token = CSRF_RE
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                TimeTreeError::Authentication(
                    "Could not extract CSRF token from signin page".to_string(),
                )
            })?;

        debug!("refreshed CSRF token");
        self.state.lock().await.csrf_token = Some(token);
        Ok(())
    }

    /// PUT credentials to the signin endpoint.
    async fn submit_credentials(&self, email: &str, password: &str) -> Result<(), TimeTreeError> {
        let headers = self.session_headers().await?;

        let payload = serde_json::json!({
            "uid": email,
            "password": password,
            "uuid": self.device_uuid,
        });

        let response = self
            .http
            .put(format!("{}{}", self.base_url, SIGNIN_ENDPOINT))
            .headers(headers)
            .json(&payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200 => Ok(()),
            401 | 403 => Err(TimeTreeError::Authentication(
                "Invalid email or password".to_string(),
            )),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(TimeTreeError::Authentication(format!(
                    "Login failed: HTTP {} - {}",
                    status, body
                )))
            }
        }
    }
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(HEADER_APP, HeaderValue::from_static(APP_ID));
    headers
}

fn header_value(token: &str) -> Result<HeaderValue, TimeTreeError> {
    HeaderValue::from_str(token)
        .map_err(|_| TimeTreeError::Authentication("CSRF token is not a valid header".to_string()))
}
