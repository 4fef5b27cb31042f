//! Recurrence expansion for recurring events.
//!
//! Expands an event's `RRULE:` / `EXDATE:` entries into concrete occurrences
//! within a query window. Expansion is pure: the same event and window always
//! produce the same occurrence set.
//!
//! Parse-failure policy: a broken RRULE entry aborts expansion for the whole
//! event and falls back to the single mapped occurrence (showing something
//! beats showing nothing); a broken EXDATE token is dropped on its own.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::debug;

use timetree_api::Event;

use crate::view::{map_event, Occurrence, OccurrenceTime, MIN_TIMED_SPAN_MS};

/// Cap on generated instants per expansion call. Two years of daily
/// occurrences; window queries are far smaller in practice.
const EXPANSION_LIMIT: u16 = 730;

/// Resolve an IANA zone name, falling back to UTC for anything unknown.
pub(crate) fn event_timezone(name: &str) -> Tz {
    name.parse().unwrap_or(Tz::UTC)
}

/// Expand a recurring event into occurrences within `[window_start, window_end]`
/// (both bounds inclusive).
pub fn expand(
    event: &Event,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Occurrence> {
    let tz = event_timezone(&event.start_timezone);
    let Some(dtstart) = DateTime::<Utc>::from_timestamp_millis(event.start_at) else {
        return fallback(event, window_start, window_end);
    };

    let Some(set) = build_rule_set(event, dtstart, tz) else {
        return fallback(event, window_start, window_end);
    };

    // after/before are exclusive; pad by a second so both bounds are inclusive.
    let rtz: rrule::Tz = Utc.into();
    let after = (window_start - Duration::seconds(1)).with_timezone(&rtz);
    let before = (window_end + Duration::seconds(1)).with_timezone(&rtz);
    let result = set.after(after).before(before).all(EXPANSION_LIMIT);

    let duration_ms = event.end_at - event.start_at;
    result
        .dates
        .iter()
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|occ| *occ >= window_start && *occ <= window_end)
        .map(|occ| occurrence_at(event, occ, duration_ms, tz))
        .collect()
}

/// Assemble an iCalendar rule block (DTSTART + RRULE + EXDATE lines) and
/// parse it as one set. Returns `None` when no RRULE entry is present or any
/// RRULE fails to parse.
fn build_rule_set(event: &Event, dtstart: DateTime<Utc>, tz: Tz) -> Option<RRuleSet> {
    let mut lines = Vec::new();
    lines.push(format!(
        "DTSTART;TZID={}:{}",
        tz.name(),
        dtstart.with_timezone(&tz).format("%Y%m%dT%H%M%S")
    ));

    let mut have_rule = false;
    for entry in &event.recurrences {
        if let Some(raw) = entry.strip_prefix("RRULE:") {
            lines.push(format!("RRULE:{}", fix_bare_until(raw)));
            have_rule = true;
        } else if let Some(raw) = entry.strip_prefix("EXDATE:") {
            // Unparseable exclusion tokens are dropped; they must not
            // abort rule parsing.
            for instant in parse_exdates(raw, tz) {
                lines.push(format!("EXDATE:{}", instant.format("%Y%m%dT%H%M%SZ")));
            }
        }
    }
    if !have_rule {
        return None;
    }

    match lines.join("\n").parse::<RRuleSet>() {
        Ok(set) => Some(set),
        Err(err) => {
            debug!(event_id = %event.id, error = %err, "failed to parse recurrence rules");
            None
        }
    }
}

/// Normalize a bare-date UNTIL bound (e.g. `UNTIL=20210429`) to midnight UTC.
/// TimeTree supplies these for all-day recurrences; a strict rule parser
/// rejects them when DTSTART is zone-aware.
fn fix_bare_until(rule: &str) -> String {
    rule.split(';')
        .map(|part| match part.strip_prefix("UNTIL=") {
            Some(value) if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) => {
                format!("UNTIL={value}T000000Z")
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a comma-separated EXDATE value into UTC instants. Instants without
/// an explicit zone are interpreted in the event's start timezone.
fn parse_exdates(raw: &str, tz: Tz) -> Vec<DateTime<Utc>> {
    raw.split(',')
        .filter_map(|token| parse_exdate(token.trim(), tz))
        .collect()
}

fn parse_exdate(token: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Some(bare) = token.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(bare, "%Y%m%dT%H%M%S").ok()?;
        return Some(Utc.from_utc_datetime(&naive));
    }
    if token.contains('T') {
        let naive = NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%S").ok()?;
        return tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(token, "%Y%m%d").ok()?;
    tz.from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build one occurrence at `occ_start`, carrying the original duration.
fn occurrence_at(event: &Event, occ_start: DateTime<Utc>, duration_ms: i64, tz: Tz) -> Occurrence {
    let uid = format!("{}_{}", event.id, occ_start.timestamp_millis());

    let (start, end) = if event.all_day {
        let start_date = occ_start.with_timezone(&tz).date_naive();
        let mut end_date = (occ_start + Duration::milliseconds(duration_ms.max(0)))
            .with_timezone(&tz)
            .date_naive();
        // Exclusive-end convention: a single-day occurrence spans one full day.
        if end_date <= start_date {
            end_date = start_date + Duration::days(1);
        }
        (
            OccurrenceTime::Date(start_date),
            OccurrenceTime::Date(end_date),
        )
    } else {
        let span = duration_ms.max(MIN_TIMED_SPAN_MS);
        (
            OccurrenceTime::DateTime(occ_start),
            OccurrenceTime::DateTime(occ_start + Duration::milliseconds(span)),
        )
    };

    Occurrence {
        uid,
        summary: event.title.clone(),
        start,
        end,
        description: event.note.clone(),
        location: event.location.clone(),
    }
}

/// Single-occurrence fallback, subject to the window filter.
fn fallback(
    event: &Event,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Occurrence> {
    let occ = map_event(event);
    if occ.overlaps(window_start, window_end) {
        vec![occ]
    } else {
        Vec::new()
    }
}
