use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::MessageRow;
use parley_types::models::{MessagePage, MessageView};

use crate::views;
use crate::{ChatError, run_blocking};

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Per-id outcome of a batch delete. One missing or forbidden id never blocks
/// deletion of the others; callers inspect which ids made it.
pub struct DeleteOutcome {
    pub deleted: Vec<Uuid>,
    pub failed: Vec<(Uuid, ChatError)>,
}

/// Owns message rows. Edits and deletes are gated by authorship; membership
/// checks against the room happen in the gateway via the Room Directory.
#[derive(Clone)]
pub struct MessageLedger {
    db: Arc<Database>,
}

impl MessageLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a message authored by the actor and return the refreshed
    /// newest-first page for the room.
    pub async fn create(
        &self,
        actor: Uuid,
        room_id: Uuid,
        text: String,
    ) -> Result<MessagePage, ChatError> {
        let db = self.db.clone();
        let message_id = Uuid::new_v4();
        run_blocking(move || {
            let rid = room_id.to_string();
            if db.get_room(&rid)?.is_none() {
                return Err(ChatError::NotFound(format!(
                    "Room with ID \"{room_id}\" not found."
                )));
            }
            db.insert_message(&message_id.to_string(), &rid, &text, &actor.to_string())?;
            Ok(())
        })
        .await?;

        info!("Message {} sent by user {} in room {}", message_id, actor, room_id);
        self.find(room_id, None, None, None).await
    }

    /// Filtered, paginated retrieval: case-insensitive substring match on the
    /// text, newest first.
    pub async fn find(
        &self,
        room_id: Uuid,
        filter: Option<String>,
        first: Option<u64>,
        rows: Option<u64>,
    ) -> Result<MessagePage, ChatError> {
        let db = self.db.clone();
        run_blocking(move || {
            let rid = room_id.to_string();
            let filter = filter.unwrap_or_default();
            let first = first.unwrap_or(0);
            let rows = rows.unwrap_or(DEFAULT_PAGE_SIZE);

            let result = db.find_messages(&rid, &filter, first, rows)?;
            let total = db.count_messages(&rid, &filter)?;

            Ok(MessagePage {
                result: result.into_iter().map(views::message_view).collect(),
                total,
            })
        })
        .await
    }

    /// Replace the text of a message the actor authored.
    pub async fn update(
        &self,
        actor: Uuid,
        message_id: Uuid,
        text: String,
    ) -> Result<MessageView, ChatError> {
        let db = self.db.clone();
        let row = run_blocking(move || {
            let mid = message_id.to_string();
            check_ownership(&db, actor, &mid)?;
            db.update_message_text(&mid, &text, &actor.to_string())?;
            db.get_message(&mid)?.ok_or_else(|| {
                ChatError::NotFound(format!("Message with ID \"{message_id}\" not found."))
            })
        })
        .await?;

        info!("Message {} updated by user {}", message_id, actor);
        Ok(views::message_view(row))
    }

    /// Delete a batch of messages. Each id is processed independently; the
    /// outcome records which deletions succeeded and which failed.
    pub async fn delete(
        &self,
        actor: Uuid,
        room_id: Uuid,
        message_ids: Vec<Uuid>,
    ) -> Result<DeleteOutcome, ChatError> {
        let db = self.db.clone();
        let outcome = run_blocking(move || {
            let rid = room_id.to_string();
            let mut deleted = Vec::new();
            let mut failed = Vec::new();

            for id in message_ids {
                match delete_one(&db, actor, &rid, id) {
                    Ok(()) => deleted.push(id),
                    Err(err) => {
                        warn!("Failed to delete message {} for user {}: {}", id, actor, err);
                        failed.push((id, err));
                    }
                }
            }

            Ok(DeleteOutcome { deleted, failed })
        })
        .await?;

        info!(
            "User {} deleted {} message(s) in room {} ({} failed)",
            actor,
            outcome.deleted.len(),
            room_id,
            outcome.failed.len()
        );
        Ok(outcome)
    }
}

fn delete_one(db: &Database, actor: Uuid, room_id: &str, id: Uuid) -> Result<(), ChatError> {
    let mid = id.to_string();
    check_ownership(db, actor, &mid)?;
    let affected = db.delete_message(&mid, room_id)?;
    if affected == 0 {
        // Owned message exists but lives in a different room
        return Err(ChatError::NotFound(format!(
            "Message with ID \"{id}\" not found in room \"{room_id}\"."
        )));
    }
    Ok(())
}

/// Load the message, fail NotFound if absent, Forbidden unless the actor is
/// the original author.
fn check_ownership(db: &Database, actor: Uuid, message_id: &str) -> Result<MessageRow, ChatError> {
    let row = db.get_message(message_id)?.ok_or_else(|| {
        ChatError::NotFound(format!("Message with ID \"{message_id}\" not found."))
    })?;

    if row.created_by != actor.to_string() {
        return Err(ChatError::Forbidden(
            "Access Denied: You can only update or delete your own messages.".into(),
        ));
    }

    Ok(row)
}
