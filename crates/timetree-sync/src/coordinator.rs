//! Per-calendar sync coordinator.
//!
//! Owns one calendar's event store and sync cursor, drives delta sync
//! against the API client, and transparently re-authenticates once when the
//! session expires mid-refresh.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use timetree_api::{Event, EventMutation, TimeTreeClient, TimeTreeError};

use crate::error::SyncError;

/// Stored credentials used for transparent re-authentication.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Maintains the authoritative local snapshot of one calendar.
///
/// The coordinator is the only writer of its store and cursor. Several
/// coordinators (one per calendar) may share one [`TimeTreeClient`]; its
/// throttle paces their combined request stream. A failed or abandoned
/// refresh leaves store and cursor untouched — the merge runs only after the
/// whole paginated fetch has completed.
pub struct CalendarSync {
    client: Arc<TimeTreeClient>,
    calendar_id: String,
    credentials: Credentials,
    events: HashMap<String, Event>,
    cursor: Option<i64>,
}

impl CalendarSync {
    pub fn new(
        client: Arc<TimeTreeClient>,
        calendar_id: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            client,
            calendar_id: calendar_id.into(),
            credentials,
            events: HashMap::new(),
            cursor: None,
        }
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// The current snapshot, id → event. Tombstones are never present.
    pub fn snapshot(&self) -> &HashMap<String, Event> {
        &self.events
    }

    /// The delta-sync watermark in epoch milliseconds. `None` until the
    /// first successful refresh that saw an `updated_at`.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Fetch changes since the cursor and merge them into the store.
    ///
    /// On session expiry this re-authenticates once with the stored
    /// credentials and retries the fetch once. A failed re-authentication
    /// (or a second expiry) surfaces as [`SyncError::AuthFailed`], which the
    /// caller should treat as terminal until new credentials arrive; every
    /// other failure is a recoverable [`SyncError::UpdateFailed`].
    #[instrument(skip(self), level = "info")]
    pub async fn refresh(&mut self) -> Result<&HashMap<String, Event>, SyncError> {
        let (batch, _server_cursor) =
            match self.client.events(&self.calendar_id, self.cursor).await {
                Ok(batch) => batch,
                Err(err) if err.should_reauthenticate() => {
                    debug!(calendar_id = %self.calendar_id, "session expired, re-authenticating");
                    self.client
                        .authenticate(&self.credentials.email, &self.credentials.password)
                        .await
                        .map_err(SyncError::AuthFailed)?;
                    self.client
                        .events(&self.calendar_id, self.cursor)
                        .await
                        .map_err(classify)?
                }
                Err(err) => return Err(SyncError::UpdateFailed(err)),
            };

        self.merge(batch);
        info!(
            calendar_id = %self.calendar_id,
            events = self.events.len(),
            cursor = ?self.cursor,
            "refresh complete"
        );
        Ok(&self.events)
    }

    /// Create an event on this calendar. The store picks it up on the next
    /// refresh.
    pub async fn create_event(&self, mutation: &EventMutation) -> Result<Event, SyncError> {
        self.client
            .create_event(&self.calendar_id, mutation)
            .await
            .map_err(classify)
    }

    pub async fn update_event(
        &self,
        event_id: &str,
        mutation: &EventMutation,
    ) -> Result<Event, SyncError> {
        self.client
            .update_event(&self.calendar_id, event_id, mutation)
            .await
            .map_err(classify)
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<(), SyncError> {
        self.client
            .delete_event(&self.calendar_id, event_id)
            .await
            .map_err(classify)
    }

    /// Merge one completed sync batch: tombstones drop out of the store,
    /// everything else upserts by id. The cursor advances to the largest
    /// `updated_at` seen and never regresses.
    fn merge(&mut self, batch: Vec<Event>) {
        let mut latest = self.cursor.unwrap_or(0);
        for event in batch {
            if let Some(updated) = event.updated_at {
                latest = latest.max(updated);
            }
            if event.is_deleted() {
                self.events.remove(&event.id);
            } else {
                self.events.insert(event.id.clone(), event);
            }
        }
        if latest > self.cursor.unwrap_or(0) {
            self.cursor = Some(latest);
        }
    }
}

fn classify(err: TimeTreeError) -> SyncError {
    if err.should_reauthenticate() {
        SyncError::AuthFailed(err)
    } else {
        SyncError::UpdateFailed(err)
    }
}
