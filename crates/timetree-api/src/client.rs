//! TimeTree API client.

use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::auth::SessionAuth;
use crate::codec::decamelize;
use crate::error::TimeTreeError;
use crate::throttle::{RequestThrottle, DEFAULT_MIN_INTERVAL};
use crate::types::*;

const DEFAULT_BASE_URL: &str = "https://timetreeapp.com";

const CALENDARS_PATH: &str = "/api/v2/calendars";
const USER_PATH: &str = "/api/v1/user";

/// Client for the TimeTree web calendar API.
///
/// Owns the HTTP client (whose cookie jar holds the session cookie), the
/// auth state machine, and the request throttle. One instance is meant to be
/// shared across all calendars of one authenticated session.
pub struct TimeTreeClient {
    http: reqwest::Client,
    base_url: String,
    auth: SessionAuth,
    throttle: RequestThrottle,
    /// Numeric id of the authenticated user, cached after login so that
    /// created events can default to self-attendance.
    user_id: Mutex<Option<i64>>,
}

impl TimeTreeClient {
    pub fn new() -> Result<Self, TimeTreeError> {
        Self::with_options(DEFAULT_BASE_URL, DEFAULT_MIN_INTERVAL)
    }

    /// Point the client at a different deployment (or a test server).
    pub fn with_base_url(base_url: &str) -> Result<Self, TimeTreeError> {
        Self::with_options(base_url, DEFAULT_MIN_INTERVAL)
    }

    pub fn with_options(base_url: &str, min_interval: Duration) -> Result<Self, TimeTreeError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            auth: SessionAuth::new(http.clone(), base_url.clone()),
            http,
            base_url,
            throttle: RequestThrottle::new(min_interval),
            user_id: Mutex::new(None),
        })
    }

    /// Whether the client has an active authenticated session.
    pub async fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated().await
    }

    // ---------------------------------------------------------------- //
    //  Authentication
    // ---------------------------------------------------------------- //

    /// Authenticate with email and password.
    ///
    /// Runs the full signin flow, then fetches the user profile once to
    /// cache the numeric user id used when defaulting event attendees. A
    /// non-numeric id just disables that defaulting.
    #[instrument(skip(self, password), level = "info")]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(), TimeTreeError> {
        self.auth.authenticate(email, password).await?;
        let user = self.user().await?;
        *self.user_id.lock().await = user.id.parse::<i64>().ok();
        Ok(())
    }

    /// Check whether the current session is still valid.
    #[instrument(skip(self), level = "info")]
    pub async fn validate_session(&self) -> Result<(), TimeTreeError> {
        self.auth.validate_session().await
    }

    // ---------------------------------------------------------------- //
    //  Calendars
    // ---------------------------------------------------------------- //

    /// Fetch all calendars the authenticated user has access to.
    #[instrument(skip(self), level = "info")]
    pub async fn calendars(&self) -> Result<Vec<Calendar>, TimeTreeError> {
        let data = self.request(Method::GET, CALENDARS_PATH, &[], None).await?;
        unwrap_list(data, "calendars")
            .into_iter()
            .map(|raw| decode::<ApiCalendar>(raw).map(Calendar::from_api))
            .collect()
    }

    /// Fetch labels (color tags) for a calendar.
    #[instrument(skip(self), level = "info")]
    pub async fn labels(&self, calendar_id: &str) -> Result<Vec<Label>, TimeTreeError> {
        let path = format!(
            "/api/v1/calendar/{}/labels",
            urlencoding::encode(calendar_id)
        );
        let data = self.request(Method::GET, &path, &[], None).await?;
        unwrap_list(data, "labels")
            .into_iter()
            .map(|raw| decode::<ApiLabel>(raw).map(Label::from_api))
            .collect()
    }

    // ---------------------------------------------------------------- //
    //  Events
    // ---------------------------------------------------------------- //

    /// Fetch all events from a calendar, following chunk pagination.
    ///
    /// The API returns events in chunks of ~300. Each chunked response
    /// carries a `chunk` flag (true = more data available) and a `since`
    /// cursor; the loop follows chunks until the flag clears. A bare list
    /// response means no pagination.
    ///
    /// Returns the accumulated events (soft-deleted ones included) and the
    /// cursor for the next delta-sync call.
    #[instrument(skip(self), level = "info")]
    pub async fn events(
        &self,
        calendar_id: &str,
        since: Option<i64>,
    ) -> Result<(Vec<Event>, Option<i64>), TimeTreeError> {
        let path = format!(
            "/api/v1/calendar/{}/events",
            urlencoding::encode(calendar_id)
        );

        let mut all_events = Vec::new();
        let mut cursor = since;
        let mut last_since = since;

        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(ms) = cursor {
                query.push(("since", ms.to_string()));
            }

            let data = self.request(Method::GET, &path, &query, None).await?;

            let (raw, has_more) = match data {
                Value::Object(mut map) => {
                    let raw = match map.remove("events") {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    let has_more = map.get("chunk").and_then(Value::as_bool).unwrap_or(false);
                    if let Some(next) = map.get("since").and_then(Value::as_i64) {
                        cursor = Some(next);
                        last_since = Some(next);
                    }
                    (raw, has_more)
                }
                Value::Array(items) => (items, false),
                _ => (Vec::new(), false),
            };

            for item in raw {
                let api: ApiEvent = decode(item)?;
                all_events.push(Event::from_api(api, calendar_id));
            }

            if !has_more {
                break;
            }
            debug!(cursor = ?cursor, "following event chunk");
        }

        Ok((all_events, last_since))
    }

    /// Create a new event on a calendar.
    ///
    /// The backend does not allocate event ids; a fresh one is generated
    /// client-side. If the caller supplied no attendees and the user id is
    /// known, the event defaults to self-attendance, matching the web app.
    #[instrument(skip(self, mutation), level = "info")]
    pub async fn create_event(
        &self,
        calendar_id: &str,
        mutation: &EventMutation,
    ) -> Result<Event, TimeTreeError> {
        let path = format!(
            "/api/v1/calendar/{}/event",
            urlencoding::encode(calendar_id)
        );

        let mut body = mutation.to_body();
        body["id"] = Value::String(Uuid::new_v4().simple().to_string());
        if mutation.attendees.is_empty() {
            if let Some(user_id) = *self.user_id.lock().await {
                body["attendees"] = json!([user_id]);
            }
        }

        let data = self.request(Method::POST, &path, &[], Some(&body)).await?;
        let api: ApiEvent = decode(unwrap_entity(data, "event"))?;
        Ok(Event::from_api(api, calendar_id))
    }

    /// Update an existing event.
    #[instrument(skip(self, mutation), level = "info")]
    pub async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        mutation: &EventMutation,
    ) -> Result<Event, TimeTreeError> {
        let path = format!(
            "/api/v1/calendar/{}/event/{}",
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );

        let body = mutation.to_body();
        let data = self.request(Method::PUT, &path, &[], Some(&body)).await?;
        let api: ApiEvent = decode(unwrap_entity(data, "event"))?;
        Ok(Event::from_api(api, calendar_id))
    }

    /// Delete an event from a calendar.
    #[instrument(skip(self), level = "info")]
    pub async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), TimeTreeError> {
        let path = format!(
            "/api/v1/calendar/{}/event/{}",
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );
        self.request(Method::DELETE, &path, &[], None).await?;
        Ok(())
    }

    // ---------------------------------------------------------------- //
    //  User
    // ---------------------------------------------------------------- //

    /// Fetch the current authenticated user's profile.
    #[instrument(skip(self), level = "info")]
    pub async fn user(&self) -> Result<User, TimeTreeError> {
        let data = self.request(Method::GET, USER_PATH, &[], None).await?;
        let api: ApiUser = decode(unwrap_entity(data, "user"))?;
        Ok(User::from_api(api))
    }

    // ---------------------------------------------------------------- //
    //  Internal HTTP layer
    // ---------------------------------------------------------------- //

    /// Execute one API request with throttling, auth headers, status→error
    /// mapping, and response decamelization.
    ///
    /// Mutation bodies go out with snake_case keys as-is; this backend
    /// accepts that form, so only responses pass through the codec.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, TimeTreeError> {
        self.throttle.acquire().await;

        let mutating = matches!(method, Method::POST | Method::PUT | Method::DELETE);
        let headers = self.auth.headers(mutating).await?;

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        match status {
            401 | 403 => {
                self.auth.mark_unauthenticated().await;
                Err(TimeTreeError::Authentication(format!(
                    "Authentication failed: HTTP {}",
                    status
                )))
            }
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok());
                Err(TimeTreeError::RateLimited { retry_after })
            }
            204 => Ok(Value::Null),
            s if s >= 400 => {
                let body = response.text().await.unwrap_or_default();
                Err(TimeTreeError::Api { status, body })
            }
            _ => {
                let data: Value = response.json().await?;
                Ok(decamelize(data))
            }
        }
    }
}

/// Accept both a bare JSON list and a `{key: [...]}` wrapper.
fn unwrap_list(data: Value, key: &str) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Accept both a bare JSON object and a `{key: {...}}` wrapper.
fn unwrap_entity(data: Value, key: &str) -> Value {
    match data {
        Value::Object(mut map) if map.contains_key(key) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, TimeTreeError> {
    serde_json::from_value(value).map_err(|err| TimeTreeError::Api {
        status: 0,
        body: format!("Unexpected response shape: {}", err),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SIGNIN_HTML: &str = "<meta name=\"csrf-token\" content=\"csrf-abc\">";

    /// Mount the auth endpoints and return a client that has logged in.
    async fn authed_client(server: &MockServer) -> TimeTreeClient {
        Mock::given(method("GET"))
            .and(path("/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SIGNIN_HTML))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/auth/email/signin"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user": {"id": 42, "name": "Test User"}
            })))
            .mount(server)
            .await;

        let client =
            TimeTreeClient::with_options(&server.uri(), Duration::from_millis(1)).unwrap();
        client.authenticate("user@example.com", "pw").await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_authenticate_caches_user_id() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;
        assert!(client.is_authenticated().await);
        assert_eq!(*client.user_id.lock().await, Some(42));
    }

    #[tokio::test]
    async fn test_calendars_wrapped_response() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/calendars"))
            .and(header("x-timetreea", "web/2.1.0/de"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "calendars": [
                    {"id": 1, "name": "Family", "imageUrl": "http://img", "createdAt": 1000, "order": 0},
                    {"id": 2, "name": "Work"}
                ]
            })))
            .mount(&server)
            .await;

        let calendars = client.calendars().await.unwrap();
        assert_eq!(calendars.len(), 2);
        assert_eq!(calendars[0].id, "1");
        // camelCase keys decode into the snake_case model
        assert_eq!(calendars[0].image_url.as_deref(), Some("http://img"));
        assert_eq!(calendars[0].created_at, Some(1000));
    }

    #[tokio::test]
    async fn test_calendars_bare_list_response() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/calendars"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "c1", "name": "Solo"}
            ])))
            .mount(&server)
            .await;

        let calendars = client.calendars().await.unwrap();
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].name, "Solo");
    }

    #[tokio::test]
    async fn test_labels() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v1/calendar/cal1/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "labels": [{"id": 1, "name": "Urgent", "color": "#f00"}]
            })))
            .mount(&server)
            .await;

        let labels = client.labels("cal1").await.unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].name, "Urgent");
    }

    fn chunk_event(id: &str, updated_at: i64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": format!("Event {id}"),
            "allDay": false,
            "startAt": 1_700_000_000_000_i64,
            "endAt": 1_700_003_600_000_i64,
            "updatedAt": updated_at
        })
    }

    #[tokio::test]
    async fn test_events_follows_chunk_pagination() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        let events_path = "/api/v1/calendar/cal1/events";
        // First call carries no cursor; later calls advance it.
        Mock::given(method("GET"))
            .and(path(events_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [chunk_event("a", 100)],
                "chunk": true,
                "since": 100
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(events_path))
            .and(query_param("since", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [chunk_event("b", 200)],
                "chunk": true,
                "since": 200
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(events_path))
            .and(query_param("since", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [chunk_event("c", 300)],
                "chunk": false,
                "since": 300
            })))
            .mount(&server)
            .await;

        let (events, cursor) = client.events("cal1", None).await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(cursor, Some(300));
    }

    #[tokio::test]
    async fn test_events_bare_list_response() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v1/calendar/cal1/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([chunk_event("only", 50)])),
            )
            .mount(&server)
            .await;

        let (events, cursor) = client.events("cal1", Some(10)).await.unwrap();
        assert_eq!(events.len(), 1);
        // No cursor in the response → the passed-in watermark is kept.
        assert_eq!(cursor, Some(10));
    }

    #[tokio::test]
    async fn test_events_include_tombstones() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v1/calendar/cal1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [{
                    "id": "dead",
                    "startAt": 0,
                    "endAt": 0,
                    "deletedAt": 1_700_000_000_000_i64
                }],
                "chunk": false
            })))
            .mount(&server)
            .await;

        let (events, _) = client.events("cal1", None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_deleted());
    }

    #[tokio::test]
    async fn test_create_event_defaults_attendees_and_id() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/calendar/cal1/event"))
            .and(header("x-csrf-token", "csrf-abc"))
            .and(body_partial_json(serde_json::json!({
                "title": "Dinner",
                "attendees": [42]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "event": {
                    "id": "evt_new",
                    "title": "Dinner",
                    "startAt": 1000,
                    "endAt": 2000
                }
            })))
            .mount(&server)
            .await;

        let mutation = EventMutation::new("Dinner", false, 1000, 2000);
        let event = client.create_event("cal1", &mutation).await.unwrap();
        assert_eq!(event.id, "evt_new");
        assert_eq!(event.calendar_id, "cal1");
    }

    #[tokio::test]
    async fn test_create_event_keeps_explicit_attendees() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/calendar/cal1/event"))
            .and(body_partial_json(serde_json::json!({"attendees": [7, 8]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt_x", "startAt": 0, "endAt": 0
            })))
            .mount(&server)
            .await;

        let mut mutation = EventMutation::new("Shared", false, 0, 0);
        mutation.attendees = vec![7, 8];
        let event = client.create_event("cal1", &mutation).await.unwrap();
        assert_eq!(event.id, "evt_x");
    }

    #[tokio::test]
    async fn test_update_event() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/calendar/cal1/event/evt_1"))
            .and(header("x-csrf-token", "csrf-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt_1", "title": "Renamed", "startAt": 0, "endAt": 0
            })))
            .mount(&server)
            .await;

        let mutation = EventMutation::new("Renamed", false, 0, 0);
        let event = client.update_event("cal1", "evt_1", &mutation).await.unwrap();
        assert_eq!(event.title, "Renamed");
    }

    #[tokio::test]
    async fn test_delete_event_no_content() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/calendar/cal1/event/evt_1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert!(client.delete_event("cal1", "evt_1").await.is_ok());
    }

    #[tokio::test]
    async fn test_unauthorized_marks_session_invalid() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v1/calendar/cal1/events"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client.events("cal1", None).await;
        assert!(matches!(result, Err(TimeTreeError::Authentication(_))));
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_rate_limited_with_retry_after() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/calendars"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let result = client.calendars().await;
        assert!(matches!(
            result,
            Err(TimeTreeError::RateLimited {
                retry_after: Some(30)
            })
        ));
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let server = MockServer::start().await;
        let client = authed_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/v2/calendars"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        match client.calendars().await {
            Err(TimeTreeError::Api { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Api error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_requests_require_authentication() {
        let server = MockServer::start().await;
        let client =
            TimeTreeClient::with_options(&server.uri(), Duration::from_millis(1)).unwrap();
        let result = client.calendars().await;
        assert!(matches!(result, Err(TimeTreeError::Authentication(_))));
    }
}
