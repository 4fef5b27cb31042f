//! Client for the TimeTree web calendar API.
//!
//! Handles session-cookie authentication with CSRF tokens, request
//! throttling, JSON key translation, and the calendar/event/label/user
//! endpoints. The sync layer on top lives in the `timetree-sync` crate.

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod throttle;
pub mod types;

pub use auth::SessionAuth;
pub use client::TimeTreeClient;
pub use error::TimeTreeError;
pub use throttle::{RequestThrottle, DEFAULT_MIN_INTERVAL};
pub use types::{Calendar, Event, EventCategory, EventMutation, Label, User};
