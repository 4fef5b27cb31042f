//! Sync layer for TimeTree calendars.
//!
//! Builds on `timetree-api`: per-calendar delta-sync coordination with
//! transparent re-authentication, recurrence expansion, and mapping between
//! stored events and host-facing occurrence records.

pub mod coordinator;
pub mod error;
pub mod expand;
pub mod view;

pub use coordinator::{CalendarSync, Credentials};
pub use error::SyncError;
pub use expand::expand;
pub use view::{
    map_event, next_occurrence, occurrences_in_window, MutationInput, MutationTime, Occurrence,
    OccurrenceTime,
};
