use chrono::Utc;
use rusqlite::params;
use tracing::instrument;

use rtchat_core::{GroupId, Message, MessageId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT_COLUMNS: &str = "SELECT id, group_name, author, body, created_at FROM chat_messages";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message to a group. The returned id is the store-assigned sequence.
    #[instrument(
        skip(self, body),
        fields(group_id = %group, author = %author, body_len = body.len())
    )]
    pub fn create(
        &self,
        group: &GroupId,
        author: &UserId,
        body: &str,
    ) -> Result<Message, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO chat_messages (group_name, author, body, created_at)
                 SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM chat_groups WHERE name = ?1)",
                params![group.as_str(), author.as_str(), body, now],
            )?;
            if inserted == 0 {
                return Err(StoreError::NotFound(format!("group {group}")));
            }
            Ok(Message {
                id: MessageId::new(conn.last_insert_rowid()),
                group_id: group.clone(),
                author: author.clone(),
                body: body.to_string(),
                created_at: now,
            })
        })
    }

    /// Get a message by id.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Newest `limit` messages of a group, newest first.
    #[instrument(skip(self), fields(group_id = %group))]
    pub fn recent(&self, group: &GroupId, limit: u32) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE group_name = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(params![group.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self, group: &GroupId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE group_name = ?1",
                [group.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let id: i64 = row_helpers::get(row, 0, "chat_messages", "id")?;
    let group: String = row_helpers::get(row, 1, "chat_messages", "group_name")?;
    let author: String = row_helpers::get(row, 2, "chat_messages", "author")?;
    Ok(Message {
        id: MessageId::new(id),
        group_id: GroupId::from(group),
        author: UserId::from(author),
        body: row_helpers::get(row, 3, "chat_messages", "body")?,
        created_at: row_helpers::get(row, 4, "chat_messages", "created_at")?,
    })
}
