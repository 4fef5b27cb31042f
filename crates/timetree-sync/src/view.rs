//! View mapping between stored events and occurrence records.
//!
//! Occurrences are what hosts display: all-day ones carry dates with an
//! exclusive end, timed ones carry UTC instants. The reverse direction turns
//! loosely-typed host input into a validated [`MutationInput`] and then into
//! an [`EventMutation`] for the API.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use timetree_api::{Event, EventMutation};

use crate::error::SyncError;
use crate::expand::{event_timezone, expand};

/// Minimal span for timed occurrences. Zero-length events would be invisible
/// to overlap queries.
pub(crate) const MIN_TIMED_SPAN_MS: i64 = 60_000;

/// Start or end of an occurrence. All-day values are plain dates; timed
/// values are UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceTime {
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl OccurrenceTime {
    /// Comparable key for mixed all-day/timed sorting: dates count as their
    /// midnight-UTC instant.
    pub fn sort_key(&self) -> DateTime<Utc> {
        match self {
            Self::Date(date) => Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
            Self::DateTime(dt) => *dt,
        }
    }
}

/// One concrete calendar occurrence, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub uid: String,
    pub summary: String,
    pub start: OccurrenceTime,
    pub end: OccurrenceTime,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl Occurrence {
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.start.sort_key()
    }

    /// Whether this occurrence intersects the half-open window
    /// `[window_start, window_end)`.
    pub fn overlaps(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        self.end.sort_key() > window_start && self.start.sort_key() < window_end
    }
}

fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn date_in_zone(ms: i64, zone: &str) -> NaiveDate {
    ms_to_utc(ms)
        .with_timezone(&event_timezone(zone))
        .date_naive()
}

/// Map a stored event to its single occurrence.
///
/// TimeTree stores all-day ends inclusively; consumers expect exclusive
/// end dates. Only a span that would collapse gets corrected, so multi-day
/// events pass through as stored.
pub fn map_event(event: &Event) -> Occurrence {
    let (start, end) = if event.all_day {
        let start_date = date_in_zone(event.start_at, &event.start_timezone);
        let mut end_date = date_in_zone(event.end_at, &event.end_timezone);
        if end_date <= start_date {
            end_date = start_date + Duration::days(1);
        }
        (
            OccurrenceTime::Date(start_date),
            OccurrenceTime::Date(end_date),
        )
    } else {
        let start = ms_to_utc(event.start_at);
        let mut end = ms_to_utc(event.end_at);
        if end <= start {
            end = start + Duration::milliseconds(MIN_TIMED_SPAN_MS);
        }
        (
            OccurrenceTime::DateTime(start),
            OccurrenceTime::DateTime(end),
        )
    };

    Occurrence {
        uid: event.id.clone(),
        summary: event.title.clone(),
        start,
        end,
        description: event.note.clone(),
        location: event.location.clone(),
    }
}

/// All occurrences from a set of events intersecting the window, sorted by
/// start. Recurring events are expanded; tombstones are skipped.
pub fn occurrences_in_window<'a, I>(
    events: I,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Occurrence>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut out = Vec::new();
    for event in events {
        if event.is_deleted() {
            continue;
        }
        if event.is_recurring() {
            out.extend(expand(event, window_start, window_end));
        } else {
            let occ = map_event(event);
            if occ.overlaps(window_start, window_end) {
                out.push(occ);
            }
        }
    }
    out.sort_by_key(Occurrence::sort_key);
    out
}

/// The next occurrence that is still in progress or upcoming, looking one
/// year ahead. Recurring occurrences that began before `now` are not
/// considered.
pub fn next_occurrence<'a, I>(events: I, now: DateTime<Utc>) -> Option<Occurrence>
where
    I: IntoIterator<Item = &'a Event>,
{
    occurrences_in_window(events, now, now + Duration::days(365))
        .into_iter()
        .find(|occ| occ.end.sort_key() > now)
}

/// When an event starts and ends, with the variant chosen explicitly by the
/// caller rather than inferred from which fields happen to be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationTime {
    Timed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: String,
    },
    /// `end_date` is exclusive, matching the occurrence convention.
    AllDay {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

/// Validated event-write input from a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationInput {
    pub summary: String,
    pub time: MutationTime,
    pub description: Option<String>,
    pub location: Option<String>,
}

impl MutationInput {
    /// Host-boundary adapter for loosely-keyed JSON input.
    ///
    /// Hosts have accumulated several spellings for the same fields over
    /// time: `dtstart`/`dtend`, `start`/`end`, `start_date_time`/
    /// `end_date_time` for timed events and `start_date`/`end_date` for
    /// all-day ones. Bare dates select the all-day variant; anything with a
    /// time component selects the timed variant.
    pub fn from_fields(fields: &Value) -> Result<Self, SyncError> {
        let obj = fields
            .as_object()
            .ok_or_else(|| SyncError::InvalidInput("expected an object".to_string()))?;

        let summary = obj
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let location = obj
            .get("location")
            .and_then(Value::as_str)
            .map(str::to_string);

        let start = field_value(obj, &["dtstart", "start", "start_date_time", "start_date"])
            .ok_or_else(|| SyncError::InvalidInput("missing start".to_string()))?;
        let end = field_value(obj, &["dtend", "end", "end_date_time", "end_date"])
            .ok_or_else(|| SyncError::InvalidInput("missing end".to_string()))?;

        let time = match (parse_time_field(start)?, parse_time_field(end)?) {
            (OccurrenceTime::Date(start_date), OccurrenceTime::Date(end_date)) => {
                MutationTime::AllDay {
                    start_date,
                    end_date,
                }
            }
            (OccurrenceTime::DateTime(start), OccurrenceTime::DateTime(end)) => {
                MutationTime::Timed {
                    start,
                    end,
                    timezone: "UTC".to_string(),
                }
            }
            _ => {
                return Err(SyncError::InvalidInput(
                    "start and end must both be dates or both be datetimes".to_string(),
                ))
            }
        };

        Ok(Self {
            summary,
            time,
            description,
            location,
        })
    }

    /// Convert to the API mutation record, moving the all-day end back to
    /// the internal inclusive convention (minus one day, floored at the
    /// start date).
    pub fn into_mutation(self) -> EventMutation {
        let mut mutation = match self.time {
            MutationTime::AllDay {
                start_date,
                end_date,
            } => {
                let inclusive_end = (end_date - Duration::days(1)).max(start_date);
                EventMutation::new(
                    self.summary,
                    true,
                    midnight_utc_ms(start_date),
                    midnight_utc_ms(inclusive_end),
                )
            }
            MutationTime::Timed {
                start,
                end,
                timezone,
            } => {
                let mut m = EventMutation::new(
                    self.summary,
                    false,
                    start.timestamp_millis(),
                    end.timestamp_millis(),
                );
                m.start_timezone = timezone.clone();
                m.end_timezone = timezone;
                m
            }
        };
        mutation.note = self.description;
        mutation.location = self.location;
        mutation
    }
}

fn midnight_utc_ms(date: NaiveDate) -> i64 {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
        .timestamp_millis()
}

fn field_value<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

/// Parse one start/end field: bare date, RFC 3339, a plain
/// `YYYY-MM-DD HH:MM:SS` (taken as UTC), or an epoch-millisecond number.
fn parse_time_field(value: &Value) -> Result<OccurrenceTime, SyncError> {
    if let Some(ms) = value.as_i64() {
        return Ok(OccurrenceTime::DateTime(ms_to_utc(ms)));
    }
    let text = value
        .as_str()
        .ok_or_else(|| SyncError::InvalidInput(format!("unsupported time value: {value}")))?;

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(OccurrenceTime::Date(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(OccurrenceTime::DateTime(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(OccurrenceTime::DateTime(Utc.from_utc_datetime(&naive)));
        }
    }
    Err(SyncError::InvalidInput(format!(
        "cannot parse time value: {text}"
    )))
}
