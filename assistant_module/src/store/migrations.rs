use std::collections::HashSet;

use rusqlite::Connection;

use super::StoreError;

/// Columns added to `events` after the first release of the schema.
pub(super) fn ensure_events_columns(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(events)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }

    if !columns.contains("label") {
        conn.execute("ALTER TABLE events ADD COLUMN label TEXT", [])?;
    }
    if !columns.contains("location") {
        conn.execute("ALTER TABLE events ADD COLUMN location TEXT", [])?;
    }
    if !columns.contains("completed") {
        conn.execute(
            "ALTER TABLE events ADD COLUMN completed INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}
