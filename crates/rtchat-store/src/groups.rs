use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};
use uuid::Uuid;

use rtchat_core::{Group, GroupId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub struct GroupRepo {
    db: Database,
}

impl GroupRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a group. Fails with `Conflict` if the name is taken.
    #[instrument(skip(self, members), fields(group_id = %name))]
    pub fn create(
        &self,
        name: &GroupId,
        is_private: bool,
        members: &[UserId],
    ) -> Result<Group, StoreError> {
        self.db.with_tx(|tx| {
            if exists(tx, name)? {
                return Err(StoreError::Conflict(format!("group {name} already exists")));
            }
            insert_group(tx, name, is_private, members)
        })
    }

    /// Return the group, creating it as a public group on first reference.
    #[instrument(skip(self), fields(group_id = %name))]
    pub fn get_or_create(&self, name: &GroupId) -> Result<Group, StoreError> {
        self.db.with_tx(|tx| {
            if exists(tx, name)? {
                return load_group(tx, name);
            }
            insert_group(tx, name, false, &[])
        })
    }

    /// Get a group by name.
    #[instrument(skip(self), fields(group_id = %name))]
    pub fn get(&self, name: &GroupId) -> Result<Group, StoreError> {
        self.db.with_conn(|conn| load_group(conn, name))
    }

    /// List all groups, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Group>, StoreError> {
        self.db.with_conn(|conn| {
            let names: Vec<String> = conn
                .prepare("SELECT name FROM chat_groups ORDER BY created_at, name")?
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            names
                .into_iter()
                .map(|n| load_group(conn, &GroupId::from(n)))
                .collect()
        })
    }

    /// Find the private group shared by exactly these two users, or create one
    /// under a generated name.
    #[instrument(skip(self), fields(user_a = %a, user_b = %b))]
    pub fn get_or_create_private(&self, a: &UserId, b: &UserId) -> Result<Group, StoreError> {
        if a == b {
            return Err(StoreError::Conflict(format!(
                "cannot open a private group between {a} and themselves"
            )));
        }
        self.db.with_tx(|tx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT g.name FROM chat_groups g
                     WHERE g.is_private = 1
                       AND EXISTS (SELECT 1 FROM group_members m
                                   WHERE m.group_name = g.name AND m.user_id = ?1)
                       AND EXISTS (SELECT 1 FROM group_members m
                                   WHERE m.group_name = g.name AND m.user_id = ?2)
                       AND (SELECT COUNT(*) FROM group_members m WHERE m.group_name = g.name) = 2
                     ORDER BY g.created_at LIMIT 1",
                    params![a.as_str(), b.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(name) = existing {
                return load_group(tx, &GroupId::from(name));
            }

            let name = GroupId::from(format!("dm_{}", Uuid::now_v7().simple()));
            insert_group(tx, &name, true, &[a.clone(), b.clone()])
        })
    }

    /// Add a permitted member. Returns whether the member list changed.
    #[instrument(skip(self), fields(group_id = %name, user_id = %user))]
    pub fn add_member(&self, name: &GroupId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            if !exists(conn, name)? {
                return Err(StoreError::NotFound(format!("group {name}")));
            }
            let changed = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_name, user_id) VALUES (?1, ?2)",
                params![name.as_str(), user.as_str()],
            )?;
            Ok(changed == 1)
        })
    }
}

fn exists(conn: &Connection, name: &GroupId) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM chat_groups WHERE name = ?1",
            [name.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert_group(
    conn: &Connection,
    name: &GroupId,
    is_private: bool,
    members: &[UserId],
) -> Result<Group, StoreError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO chat_groups (name, is_private, created_at) VALUES (?1, ?2, ?3)",
        params![name.as_str(), i64::from(is_private), now],
    )?;
    for member in members {
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_name, user_id) VALUES (?1, ?2)",
            params![name.as_str(), member.as_str()],
        )?;
    }
    info!(group_id = %name, is_private, "group created");

    let mut members = members.to_vec();
    members.sort();
    members.dedup();
    Ok(Group {
        id: name.clone(),
        is_private,
        members,
        created_at: now,
    })
}

fn load_group(conn: &Connection, name: &GroupId) -> Result<Group, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name, is_private, created_at FROM chat_groups WHERE name = ?1",
    )?;
    let mut rows = stmt.query([name.as_str()])?;
    let Some(row) = rows.next()? else {
        return Err(StoreError::NotFound(format!("group {name}")));
    };
    let id: String = row_helpers::get(row, 0, "chat_groups", "name")?;
    let is_private = row_helpers::get_flag(row, 1, "chat_groups", "is_private")?;
    let created_at: String = row_helpers::get(row, 2, "chat_groups", "created_at")?;

    let members: Vec<UserId> = conn
        .prepare("SELECT user_id FROM group_members WHERE group_name = ?1 ORDER BY user_id")?
        .query_map([name.as_str()], |row| row.get::<_, String>(0))?
        .map(|r| r.map(UserId::from))
        .collect::<Result<_, _>>()?;

    Ok(Group {
        id: GroupId::from(id),
        is_private,
        members,
        created_at,
    })
}
