use crate::Database;
use crate::models::{MessageRow, ParticipantRow, RoomRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, email: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email) VALUES (?1, ?2, ?3)",
                (id, username, email),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, username, email, created_at FROM users WHERE id = ?1")?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    // -- Rooms --

    pub fn insert_room(
        &self,
        id: &str,
        name: Option<&str>,
        room_type: &str,
        actor: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO rooms (id, name, room_type, created_by, updated_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5)",
                rusqlite::params![id, name, room_type, actor, ts],
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, id))
    }

    /// Partial update: the name changes only when supplied; the audit columns
    /// change on every call.
    pub fn update_room(&self, id: &str, name: Option<&str>, actor: &str) -> Result<()> {
        self.with_conn(|conn| {
            let ts = now();
            match name {
                Some(name) => {
                    conn.execute(
                        "UPDATE rooms SET name = ?2, updated_by = ?3, updated_at = ?4 WHERE id = ?1",
                        rusqlite::params![id, name, actor, ts],
                    )?;
                }
                None => {
                    conn.execute(
                        "UPDATE rooms SET updated_by = ?2, updated_at = ?3 WHERE id = ?1",
                        rusqlite::params![id, actor, ts],
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn room_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id
                 FROM rooms r
                 JOIN room_participants p ON p.room_id = r.id
                 WHERE p.user_id = ?1
                 ORDER BY r.created_at DESC",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    pub fn participants_of_room(&self, room_id: &str) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            // JOIN users so callers get the public username without an extra lookup
            let mut stmt = conn.prepare(
                "SELECT p.room_id, p.user_id, u.username
                 FROM room_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.room_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(ParticipantRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replace the full membership set of a room: delete-then-bulk-insert
    /// inside one transaction. Any failure (e.g. a duplicate user id hitting
    /// the UNIQUE constraint) rolls the whole replacement back, leaving the
    /// prior roster intact.
    pub fn replace_participants(
        &self,
        room_id: &str,
        user_ids: &[String],
        actor: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let ts = now();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM room_participants WHERE room_id = ?1",
                [room_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO room_participants (room_id, user_id, created_by, updated_by, created_at)
                     VALUES (?1, ?2, ?3, ?3, ?4)",
                )?;
                for user_id in user_ids {
                    stmt.execute(rusqlite::params![room_id, user_id, actor, ts])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete a room and everything hanging off it, in dependency order,
    /// inside one transaction. Returns false (and commits nothing) when the
    /// room row turns out to be absent at the final step.
    pub fn delete_room_cascade(&self, room_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE room_id = ?1", [room_id])?;
            tx.execute(
                "DELETE FROM room_participants WHERE room_id = ?1",
                [room_id],
            )?;
            let affected = tx.execute("DELETE FROM rooms WHERE id = ?1", [room_id])?;
            if affected == 0 {
                // Dropping the transaction rolls back the dependent deletes
                return Ok(false);
            }
            tx.commit()?;
            Ok(true)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, id: &str, room_id: &str, text: &str, actor: &str) -> Result<()> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO messages (id, room_id, text, created_by, updated_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5)",
                rusqlite::params![id, room_id, text, actor, ts],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.room_id, m.text, m.created_by, m.updated_by, u.username,
                        m.created_at, m.updated_at
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.created_by
                 WHERE m.id = ?1",
            )?;
            let row = stmt.query_row([id], map_message_row).optional()?;
            Ok(row)
        })
    }

    pub fn update_message_text(&self, id: &str, text: &str, actor: &str) -> Result<()> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "UPDATE messages SET text = ?2, updated_by = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, text, actor, ts],
            )?;
            Ok(())
        })
    }

    pub fn delete_message(&self, id: &str, room_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND room_id = ?2",
                [id, room_id],
            )?;
            Ok(affected)
        })
    }

    /// Filtered, newest-first message page. The filter is a case-insensitive
    /// substring match; an empty filter matches everything.
    pub fn find_messages(
        &self,
        room_id: &str,
        filter: &str,
        first: u64,
        rows: u64,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.room_id, m.text, m.created_by, m.updated_by, u.username,
                        m.created_at, m.updated_at
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.created_by
                 WHERE m.room_id = ?1
                   AND LOWER(m.text) LIKE '%' || LOWER(?2) || '%'
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let result = stmt
                .query_map(
                    rusqlite::params![room_id, filter, rows, first],
                    map_message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(result)
        })
    }

    pub fn count_messages(&self, room_id: &str, filter: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let total = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE room_id = ?1 AND LOWER(text) LIKE '%' || LOWER(?2) || '%'",
                [room_id, filter],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }
}

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        text: row.get(2)?,
        created_by: row.get(3)?,
        updated_by: row.get(4)?,
        author_username: row
            .get::<_, Option<String>>(5)?
            .unwrap_or_else(|| "unknown".to_string()),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn query_room(conn: &Connection, id: &str) -> Result<Option<RoomRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, room_type, created_by, updated_by, created_at, updated_at
         FROM rooms WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(RoomRow {
                id: row.get(0)?,
                name: row.get(1)?,
                room_type: row.get(2)?,
                created_by: row.get(3)?,
                updated_by: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
