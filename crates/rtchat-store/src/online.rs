use chrono::Utc;
use rusqlite::params;
use tracing::{debug, instrument};

use rtchat_core::{GroupId, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// Durable online-member sets, one per group.
pub struct OnlineRepo {
    db: Database,
}

impl OnlineRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns whether the set changed.
    #[instrument(skip(self), fields(group_id = %group, user_id = %user))]
    pub fn add(&self, group: &GroupId, user: &UserId) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO online_members (group_name, user_id, since)
                 SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM chat_groups WHERE name = ?1)",
                params![group.as_str(), user.as_str(), now],
            )?;
            if changed == 0 && !group_exists(conn, group)? {
                return Err(StoreError::NotFound(format!("group {group}")));
            }
            Ok(changed == 1)
        })
    }

    /// Returns whether the set changed.
    #[instrument(skip(self), fields(group_id = %group, user_id = %user))]
    pub fn remove(&self, group: &GroupId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM online_members WHERE group_name = ?1 AND user_id = ?2",
                params![group.as_str(), user.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn count(&self, group: &GroupId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM online_members WHERE group_name = ?1",
                [group.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    pub fn members(&self, group: &GroupId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let users: Vec<String> = conn
                .prepare(
                    "SELECT user_id FROM online_members WHERE group_name = ?1 ORDER BY user_id",
                )?
                .query_map([group.as_str()], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            Ok(users.into_iter().map(UserId::from).collect())
        })
    }

    /// Empty every online set. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let removed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM online_members", [])?))?;
        debug!(removed, "online sets cleared");
        Ok(removed)
    }
}

fn group_exists(conn: &rusqlite::Connection, group: &GroupId) -> Result<bool, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_groups WHERE name = ?1",
        [group.as_str()],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}
