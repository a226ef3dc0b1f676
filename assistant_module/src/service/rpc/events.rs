use chrono::Duration;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::NormalizedError;
use crate::extraction::EVENT_COLORS;
use crate::models::{CalendarEvent, CalendarEventPatch, NewCalendarEvent};
use crate::store::{run_blocking, TimeRange};
use crate::validation::{InputReader, IssueKind, ValidationFailure, ValidationIssue};
use crate::BoxError;

use super::super::auth::{check_create_scope, check_resource_scope};
use super::super::state::AppState;
use super::{end_before_start, invalid_input, CallContext};

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 2000;
const LOCATION_MAX: usize = 200;
const LABEL_MAX: usize = 50;
const ID_MAX: usize = 128;

fn read_range(reader: &mut InputReader<'_>) -> TimeRange {
    TimeRange {
        from: reader.optional_datetime("from"),
        to: reader.optional_datetime("to"),
    }
}

pub(super) async fn list_personal(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let range = read_range(&mut reader);
    reader.finish().map_err(invalid_input)?;
    let user_id = ctx.require_identity()?.user_id.clone();
    let events = run_blocking(&state.store, move |store| {
        store.list_personal_events(&user_id, range)
    })
    .await?;
    Ok(json!(events))
}

pub(super) async fn list_group(state: &AppState, input: &Value) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let group_id = reader.required_string("groupId", 1, ID_MAX);
    let range = read_range(&mut reader);
    reader.finish().map_err(invalid_input)?;
    let Some(group_id) = group_id else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("groupId"),
        )));
    };
    let events = run_blocking(&state.store, move |store| {
        store.list_group_events(&group_id, range)
    })
    .await?;
    Ok(json!(events))
}

pub(super) async fn create(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let title = reader.required_string("title", 1, TITLE_MAX);
    let start = reader.required_datetime("start");
    let end = reader.optional_datetime("end");
    let all_day = reader.optional_bool("allDay").unwrap_or(false);
    let description = reader.optional_string("description", DESCRIPTION_MAX);
    let location = reader.optional_string("location", LOCATION_MAX);
    let label = reader.optional_string("label", LABEL_MAX);
    let color = reader.optional_enum("color", EVENT_COLORS);
    let group_id = reader.optional_string("groupId", ID_MAX);
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            reader.push(end_before_start());
        }
    }
    reader.finish().map_err(invalid_input)?;
    let (Some(title), Some(start)) = (title, start) else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("title"),
        )));
    };

    let group_id = group_id.filter(|group_id| !group_id.is_empty());
    let owner = check_create_scope(ctx.identity.as_ref(), group_id.as_deref())?;
    let end = end.unwrap_or_else(|| {
        if all_day {
            start + Duration::days(1)
        } else {
            start + Duration::hours(1)
        }
    });
    let new_event = NewCalendarEvent {
        title,
        description: description.filter(|value| !value.is_empty()),
        start,
        end,
        all_day,
        color,
        label: label.filter(|value| !value.is_empty()),
        location: location.filter(|value| !value.is_empty()),
        user_id: owner,
        group_id,
        message_id: None,
    };
    let created = run_blocking(&state.store, move |store| store.insert_event(&new_event)).await?;
    info!("rpc created event {} for {}", created.id, created.user_id);
    Ok(json!(created))
}

/// Persisted event plus the caller's scope check against it.
async fn load_for_mutation(
    state: &AppState,
    ctx: &CallContext,
    event_id: &str,
    caller_group_id: Option<&str>,
) -> Result<CalendarEvent, BoxError> {
    let lookup = event_id.to_string();
    let existing = run_blocking(&state.store, move |store| store.get_event(&lookup))
        .await?
        .ok_or_else(|| NormalizedError::not_found("event", event_id))?;
    check_resource_scope(ctx.identity.as_ref(), existing.scope(), caller_group_id)?;
    Ok(existing)
}

pub(super) async fn update(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let event_id = reader.required_string("eventId", 1, ID_MAX);
    let group_id = reader.optional_string("groupId", ID_MAX);
    let title = reader.optional_string("title", TITLE_MAX);
    if title.as_deref() == Some("") {
        reader.push(ValidationIssue::new(
            "title",
            IssueKind::TooSmall {
                minimum: 1,
                value_type: "string".to_string(),
            },
            "String must contain at least 1 character(s)",
        ));
    }
    let patch = CalendarEventPatch {
        title,
        description: reader.optional_string("description", DESCRIPTION_MAX),
        start: reader.optional_datetime("start"),
        end: reader.optional_datetime("end"),
        all_day: reader.optional_bool("allDay"),
        color: reader.optional_enum("color", EVENT_COLORS),
        label: reader.optional_string("label", LABEL_MAX),
        location: reader.optional_string("location", LOCATION_MAX),
        completed: reader.optional_bool("completed"),
    };
    reader.finish().map_err(invalid_input)?;
    let Some(event_id) = event_id else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("eventId"),
        )));
    };

    let group_id = group_id.filter(|group_id| !group_id.is_empty());
    let existing = load_for_mutation(state, ctx, &event_id, group_id.as_deref()).await?;
    let start = patch.start.unwrap_or(existing.start);
    let end = patch.end.unwrap_or(existing.end);
    if end < start {
        return Err(invalid_input(ValidationFailure::single(end_before_start())));
    }

    let updated = run_blocking(&state.store, move |store| {
        store.update_event(&event_id, &patch)
    })
    .await?;
    info!("rpc updated event {}", updated.id);
    Ok(json!(updated))
}

pub(super) async fn delete(
    state: &AppState,
    ctx: &CallContext,
    input: &Value,
) -> Result<Value, BoxError> {
    let mut reader = InputReader::new(input);
    let event_id = reader.required_string("eventId", 1, ID_MAX);
    let group_id = reader.optional_string("groupId", ID_MAX);
    reader.finish().map_err(invalid_input)?;
    let Some(event_id) = event_id else {
        return Err(invalid_input(ValidationFailure::single(
            ValidationIssue::required("eventId"),
        )));
    };

    let group_id = group_id.filter(|group_id| !group_id.is_empty());
    load_for_mutation(state, ctx, &event_id, group_id.as_deref()).await?;
    let deleted = event_id.clone();
    run_blocking(&state.store, move |store| store.delete_event(&deleted)).await?;
    info!("rpc deleted event {}", event_id);
    Ok(json!({ "id": event_id, "deleted": true }))
}
