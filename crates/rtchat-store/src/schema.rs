/// SQL DDL for the rtchat database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chat_groups (
    name TEXT PRIMARY KEY,
    is_private INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_name TEXT NOT NULL REFERENCES chat_groups(name),
    user_id TEXT NOT NULL,
    PRIMARY KEY (group_name, user_id)
);

CREATE TABLE IF NOT EXISTS online_members (
    group_name TEXT NOT NULL REFERENCES chat_groups(name),
    user_id TEXT NOT NULL,
    since TEXT NOT NULL,
    PRIMARY KEY (group_name, user_id)
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_name TEXT NOT NULL REFERENCES chat_groups(name),
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_group ON chat_messages(group_name, id);
CREATE INDEX IF NOT EXISTS idx_members_user ON group_members(user_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
