pub(super) const CALENDAR_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    message_type TEXT NOT NULL,
    quoted_message_id TEXT,
    group_id TEXT,
    event_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    all_day INTEGER NOT NULL DEFAULT 0,
    color TEXT,
    user_id TEXT NOT NULL,
    group_id TEXT,
    message_id TEXT UNIQUE REFERENCES messages(external_id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (end_at >= start_at)
);

CREATE INDEX IF NOT EXISTS events_user_idx ON events(user_id, group_id, start_at);
CREATE INDEX IF NOT EXISTS events_group_idx ON events(group_id, start_at);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    storage_key TEXT NOT NULL,
    user_id TEXT NOT NULL,
    group_id TEXT,
    message_id TEXT UNIQUE REFERENCES messages(external_id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS files_user_idx ON files(user_id, group_id, created_at);
CREATE INDEX IF NOT EXISTS files_group_idx ON files(group_id, created_at);
"#;
