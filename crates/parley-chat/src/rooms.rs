use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use parley_db::Database;
use parley_types::models::{RoomType, RoomView};

use crate::messages::MessageLedger;
use crate::validate::validate_room_shape;
use crate::views;
use crate::{ChatError, run_blocking};

/// Owns room rows and the membership relation. Membership is versioned as a
/// full-replacement set: every change supplies the complete target roster and
/// the store atomically clears and rewrites it.
#[derive(Clone)]
pub struct RoomDirectory {
    db: Arc<Database>,
    ledger: MessageLedger,
}

impl RoomDirectory {
    pub fn new(db: Arc<Database>, ledger: MessageLedger) -> Self {
        Self { db, ledger }
    }

    /// Validate the supplied shape, persist the room with the actor as
    /// creator/updater, then replace membership with the roster plus the
    /// actor. Returns the full sanitized view.
    pub async fn create(
        &self,
        actor: Uuid,
        room_type: RoomType,
        name: Option<String>,
        participants: Vec<Uuid>,
    ) -> Result<RoomView, ChatError> {
        validate_room_shape(actor, room_type, &participants)?;

        let db = self.db.clone();
        let room_id = Uuid::new_v4();
        run_blocking(move || {
            let rid = room_id.to_string();
            let aid = actor.to_string();
            db.insert_room(&rid, name.as_deref(), room_type.as_str(), &aid)?;

            let mut roster: Vec<String> = participants.iter().map(Uuid::to_string).collect();
            roster.push(aid.clone());
            db.replace_participants(&rid, &roster, &aid)?;
            Ok(())
        })
        .await?;

        info!("Room {} created by user {}", room_id, actor);
        self.find_info(actor, room_id).await
    }

    /// Load a room with its sanitized participant list. NotFound when the
    /// room is absent, Forbidden when the actor is not a current participant.
    pub async fn find_info(&self, actor: Uuid, room_id: Uuid) -> Result<RoomView, ChatError> {
        let db = self.db.clone();
        run_blocking(move || {
            let rid = room_id.to_string();
            let room = db.get_room(&rid)?.ok_or_else(|| {
                ChatError::NotFound(format!("Room with ID \"{room_id}\" not found."))
            })?;

            let participants = db.participants_of_room(&rid)?;
            let aid = actor.to_string();
            if !participants.iter().any(|p| p.user_id == aid) {
                return Err(ChatError::Forbidden(format!(
                    "User with ID \"{actor}\" is not a participant of room with ID \"{room_id}\"."
                )));
            }

            views::room_view(room, participants)
        })
        .await
    }

    /// Every room the actor participates in, each annotated with its most
    /// recent message page. Used for the initial snapshot push on connect.
    pub async fn find_all_for_user(&self, actor: Uuid) -> Result<Vec<RoomView>, ChatError> {
        let db = self.db.clone();
        let room_ids = run_blocking(move || {
            let ids = db.room_ids_for_user(&actor.to_string())?;
            Ok(ids
                .iter()
                .map(|id| views::parse_id(id))
                .collect::<Vec<Uuid>>())
        })
        .await?;

        let mut rooms = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            // A room can be deleted between the id listing and the per-room
            // load; skip it rather than abort the whole snapshot.
            let mut view = match self.find_info(actor, room_id).await {
                Ok(view) => view,
                Err(ChatError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            view.latest_messages = Some(self.ledger.find(room_id, None, None, None).await?);
            rooms.push(view);
        }

        Ok(rooms)
    }

    /// Partial update: name changes in place; a supplied participant list
    /// fully replaces membership with the actor implicitly re-added. The new
    /// roster is validated against the room's stored type with the same rule
    /// set as creation.
    pub async fn update(
        &self,
        actor: Uuid,
        room_id: Uuid,
        name: Option<String>,
        participants: Option<Vec<Uuid>>,
    ) -> Result<(), ChatError> {
        let db = self.db.clone();
        run_blocking(move || {
            let rid = room_id.to_string();
            let aid = actor.to_string();
            let room = db.get_room(&rid)?.ok_or_else(|| {
                ChatError::NotFound(format!("Room with ID \"{room_id}\" not found."))
            })?;

            if let Some(list) = &participants {
                let room_type = views::room_type_from_str(&room.room_type)?;
                validate_room_shape(actor, room_type, list)?;

                let mut roster: Vec<String> = list.iter().map(Uuid::to_string).collect();
                roster.push(aid.clone());
                db.replace_participants(&rid, &roster, &aid)?;
            }

            db.update_room(&rid, name.as_deref(), &aid)?;
            Ok(())
        })
        .await?;

        info!("Room {} updated by user {}", room_id, actor);
        Ok(())
    }

    /// Remove a room and everything in it. Only the original creator may
    /// delete; the cascade (messages, membership, room row) runs in one
    /// transaction.
    pub async fn delete(&self, actor: Uuid, room_id: Uuid) -> Result<(), ChatError> {
        let db = self.db.clone();
        run_blocking(move || {
            let rid = room_id.to_string();
            let room = db.get_room(&rid)?.ok_or_else(|| {
                ChatError::NotFound(format!("Room with ID \"{room_id}\" not found."))
            })?;

            if room.created_by != actor.to_string() {
                return Err(ChatError::Forbidden(
                    "Access Denied: The room was not created by given user".into(),
                ));
            }

            if !db.delete_room_cascade(&rid)? {
                return Err(ChatError::NotFound(format!(
                    "Room with ID \"{room_id}\" not found."
                )));
            }
            Ok(())
        })
        .await?;

        info!("Room {} and all associated data deleted by user {}", room_id, actor);
        Ok(())
    }
}
