//! TimeTree API types and data structures.
//!
//! `Api*` structs decode the decamelized wire payloads; the plain structs are
//! the internal model handed to callers. Conversion goes through `from_api`
//! so that missing fields get the same defaults the web client assumes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event category. The TimeTree API uses numeric values: 1 = schedule, 2 = memo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventCategory {
    Schedule,
    Memo,
}

impl EventCategory {
    /// Parse the wire value, defaulting to `Schedule` for unknown numbers.
    pub fn from_api(value: Option<i64>) -> Self {
        match value {
            Some(2) => Self::Memo,
            _ => Self::Schedule,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Schedule => 1,
            Self::Memo => 2,
        }
    }
}

impl Default for EventCategory {
    fn default() -> Self {
        Self::Schedule
    }
}

/// TimeTree user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub email: Option<String>,
}

/// TimeTree calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub image_url: Option<String>,
    /// Unix milliseconds.
    pub created_at: Option<i64>,
    pub order: Option<i64>,
}

/// Calendar label (color tag).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub color: String,
}

/// TimeTree calendar event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    pub all_day: bool,
    /// Unix milliseconds. For all-day events the end is *inclusive*.
    pub start_at: i64,
    pub end_at: i64,
    pub start_timezone: String,
    pub end_timezone: String,
    pub category: EventCategory,
    pub label_id: Option<i64>,
    pub note: Option<String>,
    pub location: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub attendees: Vec<i64>,
    /// Raw `RRULE:` / `EXDATE:` strings, in wire order.
    pub recurrences: Vec<String>,
    /// Opaque alert records, passed through unchanged.
    pub alerts: Vec<Value>,
    pub parent_id: Option<String>,
    /// Non-None marks a soft-deleted tombstone.
    pub deleted_at: Option<i64>,
    /// Unix milliseconds; source of the delta-sync cursor.
    pub updated_at: Option<i64>,
}

impl Event {
    /// Whether this event has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this event has recurrence rules.
    pub fn is_recurring(&self) -> bool {
        self.recurrences.iter().any(|r| r.starts_with("RRULE:"))
    }
}

// API response types (decamelized wire shapes).

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
    pub id: Value,
    #[serde(default)]
    pub name: String,
    pub image_url: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCalendar {
    pub id: Value,
    #[serde(default)]
    pub name: String,
    pub color: Option<String>,
    pub image_url: Option<String>,
    pub created_at: Option<i64>,
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiEvent {
    pub id: Value,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub all_day: bool,
    pub start_at: i64,
    pub end_at: i64,
    #[serde(default = "default_timezone")]
    pub start_timezone: String,
    #[serde(default = "default_timezone")]
    pub end_timezone: String,
    pub category: Option<i64>,
    pub label_id: Option<i64>,
    pub note: Option<String>,
    pub location: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    #[serde(default)]
    pub attendees: Option<Vec<i64>>,
    #[serde(default)]
    pub recurrences: Option<Vec<String>>,
    #[serde(default)]
    pub alerts: Option<Vec<Value>>,
    pub parent_id: Option<Value>,
    pub deleted_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Ids cross the wire as either strings or numbers.
fn id_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl User {
    pub fn from_api(api: ApiUser) -> Self {
        Self {
            id: id_to_string(api.id),
            name: api.name,
            image_url: api.image_url,
            email: api.email,
        }
    }
}

impl Calendar {
    pub fn from_api(api: ApiCalendar) -> Self {
        Self {
            id: id_to_string(api.id),
            name: api.name,
            color: api.color,
            image_url: api.image_url,
            created_at: api.created_at,
            order: api.order,
        }
    }
}

impl Label {
    pub fn from_api(api: ApiLabel) -> Self {
        Self {
            id: api.id,
            name: api.name,
            color: api.color,
        }
    }
}

impl Event {
    /// Convert a decamelized API payload to an [`Event`].
    ///
    /// The calendar id is supplied by the caller because event payloads do
    /// not always carry it.
    pub fn from_api(api: ApiEvent, calendar_id: &str) -> Self {
        Self {
            id: id_to_string(api.id),
            calendar_id: calendar_id.to_string(),
            title: api.title,
            all_day: api.all_day,
            start_at: api.start_at,
            end_at: api.end_at,
            start_timezone: api.start_timezone,
            end_timezone: api.end_timezone,
            category: EventCategory::from_api(api.category),
            label_id: api.label_id,
            note: api.note,
            location: api.location,
            location_lat: api.location_lat,
            location_lon: api.location_lon,
            attendees: api.attendees.unwrap_or_default(),
            recurrences: api.recurrences.unwrap_or_default(),
            alerts: api.alerts.unwrap_or_default(),
            parent_id: api.parent_id.map(id_to_string),
            deleted_at: api.deleted_at,
            updated_at: api.updated_at,
        }
    }
}

/// Data for creating or updating an event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMutation {
    pub title: String,
    pub all_day: bool,
    /// Unix milliseconds. For all-day events the end is *inclusive*.
    pub start_at: i64,
    pub end_at: i64,
    pub start_timezone: String,
    pub end_timezone: String,
    pub category: EventCategory,
    pub label_id: Option<i64>,
    pub note: Option<String>,
    pub location: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub attendees: Vec<i64>,
    pub recurrences: Vec<String>,
    pub alerts: Vec<Value>,
}

impl EventMutation {
    pub fn new(title: impl Into<String>, all_day: bool, start_at: i64, end_at: i64) -> Self {
        Self {
            title: title.into(),
            all_day,
            start_at,
            end_at,
            start_timezone: default_timezone(),
            end_timezone: default_timezone(),
            category: EventCategory::Schedule,
            label_id: None,
            note: None,
            location: None,
            location_lat: None,
            location_lon: None,
            attendees: Vec::new(),
            recurrences: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// Build the snake_case request body.
    ///
    /// The backend expects every field to be present with concrete defaults
    /// (empty strings instead of null, a label id, the attachment stub).
    pub fn to_body(&self) -> Value {
        json!({
            "title": self.title,
            "all_day": self.all_day,
            "start_at": self.start_at,
            "end_at": self.end_at,
            "start_timezone": self.start_timezone,
            "end_timezone": self.end_timezone,
            "category": self.category.as_i64(),
            "label_id": self.label_id.unwrap_or(1),
            "note": self.note.clone().unwrap_or_default(),
            "location": self.location.clone().unwrap_or_default(),
            "location_lat": self.location_lat,
            "location_lon": self.location_lon,
            "attendees": self.attendees,
            "recurrences": self.recurrences,
            "alerts": self.alerts,
            "file_uuids": [],
            "parent_id": null,
            "attachment": {"url": "", "virtual_user_attendees": []},
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_category_fallback() {
        assert_eq!(EventCategory::from_api(Some(1)), EventCategory::Schedule);
        assert_eq!(EventCategory::from_api(Some(2)), EventCategory::Memo);
        assert_eq!(EventCategory::from_api(Some(99)), EventCategory::Schedule);
        assert_eq!(EventCategory::from_api(None), EventCategory::Schedule);
    }

    #[test]
    fn test_event_from_api() {
        let json = serde_json::json!({
            "id": "evt_1",
            "title": "Meeting",
            "all_day": false,
            "start_at": 1_700_000_000_000_i64,
            "end_at": 1_700_003_600_000_i64,
            "start_timezone": "Europe/Berlin",
            "end_timezone": "Europe/Berlin",
            "category": 1,
            "note": "Room 5",
            "attendees": [42],
            "updated_at": 1_700_000_000_000_i64
        });

        let api: ApiEvent = serde_json::from_value(json).unwrap();
        let event = Event::from_api(api, "cal_1");

        assert_eq!(event.id, "evt_1");
        assert_eq!(event.calendar_id, "cal_1");
        assert_eq!(event.title, "Meeting");
        assert_eq!(event.start_timezone, "Europe/Berlin");
        assert_eq!(event.attendees, vec![42]);
        assert!(!event.is_deleted());
        assert!(!event.is_recurring());
    }

    #[test]
    fn test_event_numeric_id_and_defaults() {
        let json = serde_json::json!({
            "id": 12345,
            "start_at": 0,
            "end_at": 0,
            "attendees": null,
            "recurrences": null
        });

        let api: ApiEvent = serde_json::from_value(json).unwrap();
        let event = Event::from_api(api, "cal_1");

        assert_eq!(event.id, "12345");
        assert_eq!(event.title, "");
        assert_eq!(event.start_timezone, "UTC");
        assert!(event.attendees.is_empty());
        assert_eq!(event.category, EventCategory::Schedule);
    }

    #[test]
    fn test_tombstone_event() {
        let json = serde_json::json!({
            "id": "evt_gone",
            "start_at": 0,
            "end_at": 0,
            "deleted_at": 1_700_000_000_000_i64
        });

        let api: ApiEvent = serde_json::from_value(json).unwrap();
        let event = Event::from_api(api, "cal_1");
        assert!(event.is_deleted());
    }

    #[test]
    fn test_is_recurring_requires_rrule() {
        let json = serde_json::json!({
            "id": "e",
            "start_at": 0,
            "end_at": 0,
            "recurrences": ["EXDATE:20260209T000000Z"]
        });
        let api: ApiEvent = serde_json::from_value(json).unwrap();
        let event = Event::from_api(api, "c");
        assert!(!event.is_recurring());

        let mut event = event;
        event.recurrences.push("RRULE:FREQ=WEEKLY".into());
        assert!(event.is_recurring());
    }

    #[test]
    fn test_mutation_body_defaults() {
        let mutation = EventMutation::new("Dinner", false, 1000, 2000);
        let body = mutation.to_body();

        assert_eq!(body["title"], "Dinner");
        assert_eq!(body["label_id"], 1);
        assert_eq!(body["note"], "");
        assert_eq!(body["location"], "");
        assert_eq!(body["category"], 1);
        assert!(body["location_lat"].is_null());
        assert!(body["parent_id"].is_null());
        assert_eq!(body["file_uuids"], serde_json::json!([]));
        assert_eq!(body["attachment"]["url"], "");
        assert_eq!(
            body["attachment"]["virtual_user_attendees"],
            serde_json::json!([])
        );
    }

    #[test]
    fn test_calendar_from_api() {
        let json = serde_json::json!({
            "id": 7,
            "name": "Family",
            "color": "#ff0000",
            "created_at": 1_600_000_000_000_i64,
            "order": 0
        });
        let api: ApiCalendar = serde_json::from_value(json).unwrap();
        let calendar = Calendar::from_api(api);
        assert_eq!(calendar.id, "7");
        assert_eq!(calendar.name, "Family");
        assert_eq!(calendar.color.as_deref(), Some("#ff0000"));
    }

    #[test]
    fn test_user_from_api() {
        let json = serde_json::json!({"id": 42, "name": "Alice"});
        let api: ApiUser = serde_json::from_value(json).unwrap();
        let user = User::from_api(api);
        assert_eq!(user.id, "42");
        assert_eq!(user.name, "Alice");
        assert!(user.email.is_none());
    }
}
