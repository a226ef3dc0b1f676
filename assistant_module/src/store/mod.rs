//! SQLite-backed datastore for inbound messages, calendar events and files.
//!
//! The unique constraint on `messages.external_id` is the idempotency guard for
//! webhook re-delivery; `events.message_id` and `files.message_id` bound each
//! message to at most one derived record.

mod migrations;
mod schema;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use crate::models::{
    CalendarEvent, CalendarEventPatch, FileRecord, MessageType, NewCalendarEvent, NewFileRecord,
    NewMessage, StoredMessage,
};

use migrations::ensure_events_columns;
use schema::CALENDAR_SCHEMA;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("blocking store task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TableCounts {
    pub messages: i64,
    pub events: i64,
    pub files: i64,
}

/// Inclusive time window used by the list operations.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    fn bounds(&self) -> (String, String) {
        let from = self
            .from
            .map(format_datetime)
            .unwrap_or_else(|| "0000".to_string());
        let to = self
            .to
            .map(format_datetime)
            .unwrap_or_else(|| "9999".to_string());
        (from, to)
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

const EVENT_COLUMNS: &str = "id, title, description, start_at, end_at, all_day, color, label, \
     location, completed, user_id, group_id, message_id, created_at, updated_at";

const FILE_COLUMNS: &str = "id, file_name, content_type, size_bytes, storage_key, user_id, \
     group_id, message_id, created_at";

const MESSAGE_COLUMNS: &str =
    "id, external_id, user_id, content, message_type, quoted_message_id, group_id, event_id, created_at";

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let conn = store.open()?;
        conn.execute_batch(CALENDAR_SCHEMA)?;
        ensure_events_columns(&conn)?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    // ------------------------------------------------------------------
    // messages
    // ------------------------------------------------------------------

    /// Insert an inbound message. A second insert with the same external id
    /// fails with a UNIQUE constraint error from SQLite.
    pub fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage, StoreError> {
        let conn = self.open()?;
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            external_id: message.external_id.clone(),
            user_id: message.user_id.clone(),
            content: message.content.clone(),
            message_type: message.message_type,
            quoted_message_id: message.quoted_message_id.clone(),
            group_id: message.group_id.clone(),
            event_id: None,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO messages
                (id, external_id, user_id, content, message_type, quoted_message_id, group_id, event_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
            params![
                stored.id,
                stored.external_id,
                stored.user_id,
                stored.content,
                stored.message_type.as_str(),
                stored.quoted_message_id,
                stored.group_id,
                format_datetime(stored.created_at),
            ],
        )?;
        Ok(stored)
    }

    pub fn find_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = ?1"),
                params![external_id],
                message_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn attach_event_to_message(
        &self,
        external_id: &str,
        event_id: &str,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE messages SET event_id = ?1 WHERE external_id = ?2",
            params![event_id, external_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "message",
                id: external_id.to_string(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // events
    // ------------------------------------------------------------------

    pub fn insert_event(&self, event: &NewCalendarEvent) -> Result<CalendarEvent, StoreError> {
        let conn = self.open()?;
        let now = Utc::now();
        let stored = CalendarEvent {
            id: Uuid::new_v4().to_string(),
            title: event.title.clone(),
            description: event.description.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            color: event.color.clone(),
            label: event.label.clone(),
            location: event.location.clone(),
            completed: false,
            user_id: event.user_id.clone(),
            group_id: event.group_id.clone(),
            message_id: event.message_id.clone(),
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            &format!(
                "INSERT INTO events ({EVENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                stored.id,
                stored.title,
                stored.description,
                format_datetime(stored.start),
                format_datetime(stored.end),
                stored.all_day,
                stored.color,
                stored.label,
                stored.location,
                stored.completed,
                stored.user_id,
                stored.group_id,
                stored.message_id,
                format_datetime(stored.created_at),
                format_datetime(stored.updated_at),
            ],
        )?;
        Ok(stored)
    }

    pub fn get_event(&self, event_id: &str) -> Result<Option<CalendarEvent>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![event_id],
                event_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn update_event(
        &self,
        event_id: &str,
        patch: &CalendarEventPatch,
    ) -> Result<CalendarEvent, StoreError> {
        let mut event = self.get_event(event_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "event",
            id: event_id.to_string(),
        })?;
        if let Some(title) = &patch.title {
            event.title = title.clone();
        }
        if let Some(description) = &patch.description {
            event.description = non_empty(description);
        }
        if let Some(start) = patch.start {
            event.start = start;
        }
        if let Some(end) = patch.end {
            event.end = end;
        }
        if let Some(all_day) = patch.all_day {
            event.all_day = all_day;
        }
        if let Some(color) = &patch.color {
            event.color = non_empty(color);
        }
        if let Some(label) = &patch.label {
            event.label = non_empty(label);
        }
        if let Some(location) = &patch.location {
            event.location = non_empty(location);
        }
        if let Some(completed) = patch.completed {
            event.completed = completed;
        }
        event.updated_at = Utc::now();

        let conn = self.open()?;
        conn.execute(
            "UPDATE events
             SET title = ?2, description = ?3, start_at = ?4, end_at = ?5, all_day = ?6,
                 color = ?7, label = ?8, location = ?9, completed = ?10, updated_at = ?11
             WHERE id = ?1",
            params![
                event.id,
                event.title,
                event.description,
                format_datetime(event.start),
                format_datetime(event.end),
                event.all_day,
                event.color,
                event.label,
                event.location,
                event.completed,
                format_datetime(event.updated_at),
            ],
        )?;
        Ok(event)
    }

    pub fn delete_event(&self, event_id: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE messages SET event_id = NULL WHERE event_id = ?1",
            params![event_id],
        )?;
        let deleted = conn.execute("DELETE FROM events WHERE id = ?1", params![event_id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "event",
                id: event_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn list_personal_events(
        &self,
        user_id: &str,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, StoreError> {
        let conn = self.open()?;
        let (from, to) = range.bounds();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE user_id = ?1 AND group_id IS NULL AND end_at >= ?2 AND start_at <= ?3
             ORDER BY start_at"
        ))?;
        let rows = stmt.query_map(params![user_id, from, to], event_from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn list_group_events(
        &self,
        group_id: &str,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, StoreError> {
        let conn = self.open()?;
        let (from, to) = range.bounds();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE group_id = ?1 AND end_at >= ?2 AND start_at <= ?3
             ORDER BY start_at"
        ))?;
        let rows = stmt.query_map(params![group_id, from, to], event_from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    // ------------------------------------------------------------------
    // files
    // ------------------------------------------------------------------

    pub fn insert_file(&self, file: &NewFileRecord) -> Result<FileRecord, StoreError> {
        let conn = self.open()?;
        let stored = FileRecord {
            id: Uuid::new_v4().to_string(),
            file_name: file.file_name.clone(),
            content_type: file.content_type.clone(),
            size_bytes: file.size_bytes,
            storage_key: file.storage_key.clone(),
            user_id: file.user_id.clone(),
            group_id: file.group_id.clone(),
            message_id: file.message_id.clone(),
            created_at: Utc::now(),
        };
        conn.execute(
            &format!(
                "INSERT INTO files ({FILE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                stored.id,
                stored.file_name,
                stored.content_type,
                stored.size_bytes,
                stored.storage_key,
                stored.user_id,
                stored.group_id,
                stored.message_id,
                format_datetime(stored.created_at),
            ],
        )?;
        Ok(stored)
    }

    pub fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![file_id],
                file_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn rename_file(&self, file_id: &str, file_name: &str) -> Result<FileRecord, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE files SET file_name = ?2 WHERE id = ?1",
            params![file_id, file_name],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "file",
                id: file_id.to_string(),
            });
        }
        self.get_file(file_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "file",
            id: file_id.to_string(),
        })
    }

    pub fn delete_file(&self, file_id: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        let deleted = conn.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "file",
                id: file_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn list_personal_files(&self, user_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = ?1 AND group_id IS NULL
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], file_from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    pub fn list_group_files(&self, group_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE group_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![group_id], file_from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    pub fn table_counts(&self) -> Result<TableCounts, StoreError> {
        let conn = self.open()?;
        let count = |table: &str| -> Result<i64, StoreError> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })?)
        };
        Ok(TableCounts {
            messages: count("messages")?,
            events: count("events")?,
            files: count("files")?,
        })
    }
}

/// Run a store operation on the blocking pool.
pub async fn run_blocking<T, F>(store: &Arc<SqliteStore>, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    task::spawn_blocking(move || op(&store))
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        external_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        message_type: MessageType::parse(&row.get::<_, String>(4)?),
        quoted_message_id: row.get(5)?,
        group_id: row.get(6)?,
        event_id: row.get(7)?,
        created_at: datetime_column(row, 8)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    Ok(CalendarEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        start: datetime_column(row, 3)?,
        end: datetime_column(row, 4)?,
        all_day: row.get(5)?,
        color: row.get(6)?,
        label: row.get(7)?,
        location: row.get(8)?,
        completed: row.get(9)?,
        user_id: row.get(10)?,
        group_id: row.get(11)?,
        message_id: row.get(12)?,
        created_at: datetime_column(row, 13)?,
        updated_at: datetime_column(row, 14)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        file_name: row.get(1)?,
        content_type: row.get(2)?,
        size_bytes: row.get(3)?,
        storage_key: row.get(4)?,
        user_id: row.get(5)?,
        group_id: row.get(6)?,
        message_id: row.get(7)?,
        created_at: datetime_column(row, 8)?,
    })
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_datetime(&value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

// Fixed-width UTC timestamps so that lexical order in SQLite matches time order.
fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
