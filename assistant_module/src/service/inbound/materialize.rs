//! Turning extraction output into a persisted calendar event.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::extraction::{CandidateEvent, EVENT_COLORS};
use crate::models::NewCalendarEvent;
use crate::store::run_blocking;

use super::super::state::AppState;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercedTime {
    pub at: DateTime<Utc>,
    pub date_only: bool,
}

/// Parse an extracted timestamp. Offsetless values are local to `timezone`;
/// a bare date resolves to local midnight and is flagged `date_only`.
pub fn coerce_timestamp(value: &str, timezone: Tz) -> Option<CoercedTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(CoercedTime {
            at: parsed.with_timezone(&Utc),
            date_only: false,
        });
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_to_utc(naive, timezone).map(|at| CoercedTime {
                at,
                date_only: false,
            });
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    local_midnight(date, timezone).map(|at| CoercedTime {
        at,
        date_only: true,
    })
}

fn local_to_utc(naive: NaiveDateTime, timezone: Tz) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn local_midnight(date: NaiveDate, timezone: Tz) -> Option<DateTime<Utc>> {
    local_to_utc(date.and_hms_opt(0, 0, 0)?, timezone)
}

/// Owner, scope and originating message for a materialized event.
#[derive(Debug, Clone)]
pub(super) struct EventScope {
    pub(super) user_id: String,
    pub(super) group_id: Option<String>,
    /// External id of the originating message.
    pub(super) message_id: String,
}

pub(super) fn event_from_candidate(
    candidate: &CandidateEvent,
    timezone: Tz,
    now: DateTime<Utc>,
    scope: EventScope,
) -> NewCalendarEvent {
    let start = coerce_timestamp(&candidate.start, timezone).unwrap_or_else(|| {
        warn!("unparseable extracted start {:?}, using now", candidate.start);
        CoercedTime {
            at: now,
            date_only: false,
        }
    });
    let all_day = candidate.all_day.unwrap_or(false) || start.date_only;
    let end = candidate
        .end
        .as_deref()
        .and_then(|value| coerce_timestamp(value, timezone));

    let (start_at, end_at) = if all_day {
        let first_day = start.at.with_timezone(&timezone).date_naive();
        let last_day = end
            .map(|end| end.at.with_timezone(&timezone).date_naive())
            .filter(|day| *day >= first_day)
            .unwrap_or(first_day);
        let start_at = local_midnight(first_day, timezone).unwrap_or(start.at);
        let end_at = last_day
            .succ_opt()
            .and_then(|day| local_midnight(day, timezone))
            .unwrap_or(start_at + Duration::days(1));
        (start_at, end_at)
    } else {
        let end_at = end
            .map(|end| end.at)
            .filter(|end| *end > start.at)
            .unwrap_or(start.at + Duration::hours(1));
        (start.at, end_at)
    };

    NewCalendarEvent {
        title: candidate.title.trim().to_string(),
        description: non_empty(candidate.description.as_deref()),
        start: start_at,
        end: end_at,
        all_day,
        color: candidate
            .color
            .as_deref()
            .map(str::trim)
            .filter(|color| EVENT_COLORS.contains(color))
            .map(str::to_string),
        label: non_empty(candidate.label.as_deref()),
        location: non_empty(candidate.location.as_deref()),
        user_id: scope.user_id,
        group_id: scope.group_id,
        message_id: Some(scope.message_id),
    }
}

/// Event used when extraction finds nothing: the raw text, starting now, one hour long.
pub(super) fn fallback_event(
    text: &str,
    now: DateTime<Utc>,
    scope: EventScope,
) -> NewCalendarEvent {
    NewCalendarEvent {
        title: text.trim().to_string(),
        description: None,
        start: now,
        end: now + Duration::hours(1),
        all_day: false,
        color: None,
        label: None,
        location: None,
        user_id: scope.user_id,
        group_id: scope.group_id,
        message_id: Some(scope.message_id),
    }
}

/// Best effort; the event stands on its own if this fails.
pub(super) async fn link_message(state: &AppState, external_id: &str, event_id: &str) {
    let external = external_id.to_string();
    let event = event_id.to_string();
    if let Err(err) = run_blocking(&state.store, move |store| {
        store.attach_event_to_message(&external, &event)
    })
    .await
    {
        warn!(
            "failed to link event {} to message {}: {}",
            event_id, external_id, err
        );
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
