use tracing::warn;
use uuid::Uuid;

use parley_chat::ChatError;
use parley_chat::messages::MessageLedger;
use parley_chat::rooms::RoomDirectory;
use parley_types::events::{
    ClientEvent, CreateRoomPayload, DeleteMessagePayload, FilterMessagesPayload, RoomIdPayload,
    SendMessagePayload, ServerEvent, UpdateMessagePayload, UpdateRoomPayload,
};
use parley_types::models::RoomView;

use crate::registry::SessionRegistry;

/// Routes decoded client events to the Room Directory and Message Ledger and
/// fans results out to affected connections. The actor identifier always
/// comes from connection authentication, never from the payload.
#[derive(Clone)]
pub struct Dispatcher {
    pub registry: SessionRegistry,
    pub rooms: RoomDirectory,
    pub messages: MessageLedger,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, rooms: RoomDirectory, messages: MessageLedger) -> Self {
        Self {
            registry,
            rooms,
            messages,
        }
    }

    /// Decode one inbound text frame and dispatch it. Malformed JSON yields a
    /// typed protocol `exception` on the calling connection; the connection
    /// stays open.
    pub async fn handle_frame(&self, actor: Uuid, conn_id: Uuid, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.dispatch(actor, conn_id, event).await,
            Err(e) => {
                warn!(
                    "Connection {} sent a malformed event: {} -- raw: {}",
                    conn_id,
                    e,
                    log_preview(text)
                );
                self.reply(
                    conn_id,
                    exception(&ChatError::Protocol("Malformed event payload.".into())),
                )
                .await;
            }
        }
    }

    pub async fn dispatch(&self, actor: Uuid, conn_id: Uuid, event: ClientEvent) {
        let result = match event {
            ClientEvent::CreateRoom(p) => self.on_create_room(actor, p).await,
            ClientEvent::FetchRoomDetails(p) => self.on_fetch_room_details(actor, conn_id, p).await,
            ClientEvent::UpdateRoom(p) => self.on_update_room(actor, p).await,
            ClientEvent::DeleteRoom(p) => self.on_delete_room(actor, p).await,
            ClientEvent::SendMessage(p) => self.on_send_message(actor, p).await,
            ClientEvent::GetAllMessages(p) => self.on_get_all_messages(actor, conn_id, p).await,
            ClientEvent::UpdateMessage(p) => self.on_update_message(actor, p).await,
            ClientEvent::DeleteMessage(p) => self.on_delete_message(actor, p).await,
        };

        if let Err(err) = result {
            warn!("Event from user {} failed: {}", actor, err);
            self.reply(conn_id, exception(&err)).await;
        }
    }

    async fn on_create_room(&self, actor: Uuid, p: CreateRoomPayload) -> Result<(), ChatError> {
        let room = self
            .rooms
            .create(actor, p.room_type, p.name, p.participants)
            .await?;

        let targets = participant_ids(&room);
        self.registry
            .notify_users(&targets, &ServerEvent::RoomCreated(room))
            .await;
        Ok(())
    }

    async fn on_fetch_room_details(
        &self,
        actor: Uuid,
        conn_id: Uuid,
        p: RoomIdPayload,
    ) -> Result<(), ChatError> {
        let room = self.rooms.find_info(actor, p.room_id).await?;
        // One-shot reply to the requesting connection only
        self.reply(conn_id, ServerEvent::RoomDetailsFetched(room))
            .await;
        Ok(())
    }

    async fn on_update_room(&self, actor: Uuid, p: UpdateRoomPayload) -> Result<(), ChatError> {
        // Actor must already be a participant before touching the room
        self.rooms.find_info(actor, p.room_id).await?;
        self.rooms
            .update(actor, p.room_id, p.name, p.participants)
            .await?;

        let updated = self.rooms.find_info(actor, p.room_id).await?;
        let targets = participant_ids(&updated);
        self.registry
            .notify_users(&targets, &ServerEvent::RoomUpdated(updated))
            .await;
        Ok(())
    }

    async fn on_delete_room(&self, actor: Uuid, p: RoomIdPayload) -> Result<(), ChatError> {
        let room = self.rooms.find_info(actor, p.room_id).await?;
        self.rooms.delete(actor, p.room_id).await?;

        // The deleter already knows; notify everyone else
        let targets: Vec<Uuid> = participant_ids(&room)
            .into_iter()
            .filter(|id| *id != actor)
            .collect();
        self.registry
            .notify_users(
                &targets,
                &ServerEvent::RoomDeleted {
                    message: format!(
                        "Room with ID {} has been successfully deleted.",
                        p.room_id
                    ),
                },
            )
            .await;
        Ok(())
    }

    async fn on_send_message(&self, actor: Uuid, p: SendMessagePayload) -> Result<(), ChatError> {
        // Membership gate before the message is persisted
        let room = self.rooms.find_info(actor, p.room_id).await?;
        let page = self.messages.create(actor, p.room_id, p.text).await?;

        let targets = participant_ids(&room);
        self.registry
            .notify_users(&targets, &ServerEvent::MessageSent(page))
            .await;
        Ok(())
    }

    async fn on_get_all_messages(
        &self,
        actor: Uuid,
        conn_id: Uuid,
        p: FilterMessagesPayload,
    ) -> Result<(), ChatError> {
        self.rooms.find_info(actor, p.room_id).await?;
        let page = self
            .messages
            .find(p.room_id, p.filter, p.first, p.rows)
            .await?;
        self.reply(conn_id, ServerEvent::AllMessages(page)).await;
        Ok(())
    }

    async fn on_update_message(
        &self,
        actor: Uuid,
        p: UpdateMessagePayload,
    ) -> Result<(), ChatError> {
        let updated = self.messages.update(actor, p.message_id, p.text).await?;

        let page = self.messages.find(updated.room_id, None, None, None).await?;
        let room = self.rooms.find_info(actor, updated.room_id).await?;
        let targets = participant_ids(&room);
        self.registry
            .notify_users(&targets, &ServerEvent::MessageUpdated(page))
            .await;
        Ok(())
    }

    async fn on_delete_message(
        &self,
        actor: Uuid,
        p: DeleteMessagePayload,
    ) -> Result<(), ChatError> {
        let room = self.rooms.find_info(actor, p.room_id).await?;
        let outcome = self.messages.delete(actor, p.room_id, p.message_ids).await?;

        if outcome.deleted.is_empty() {
            // Nothing was removed; surface the first per-id failure
            if let Some((_, err)) = outcome.failed.into_iter().next() {
                return Err(err);
            }
            return Ok(());
        }

        let targets = participant_ids(&room);
        self.registry
            .notify_users(
                &targets,
                &ServerEvent::MessageDeleted {
                    message_ids: outcome.deleted,
                },
            )
            .await;
        Ok(())
    }

    /// Direct reply to the requesting connection. Delivery failure is a
    /// logged per-connection outcome, never an error for the operation.
    async fn reply(&self, conn_id: Uuid, event: ServerEvent) {
        if let Err(err) = self.registry.send_to_connection(conn_id, event).await {
            warn!("Failed to deliver reply to connection {}: {}", conn_id, err);
        }
    }
}

/// First 200 characters of a raw frame for logging. Counts characters, not
/// bytes, so truncation never lands inside a multi-byte sequence.
fn log_preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn participant_ids(room: &RoomView) -> Vec<Uuid> {
    room.participants.iter().map(|p| p.id).collect()
}

fn exception(err: &ChatError) -> ServerEvent {
    ServerEvent::Exception {
        status: err.status().into(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use parley_db::Database;
    use parley_types::models::RoomType;

    struct Peer {
        id: Uuid,
        conn_id: Uuid,
        rx: UnboundedReceiver<ServerEvent>,
    }

    impl Peer {
        fn next(&mut self) -> ServerEvent {
            self.rx.try_recv().expect("expected a delivered event")
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err(), "expected no event");
        }
    }

    async fn connect(dispatcher: &Dispatcher, id: Uuid) -> Peer {
        let (conn_id, rx) = dispatcher.registry.register(id).await;
        Peer { id, conn_id, rx }
    }

    async fn setup() -> (Dispatcher, Peer, Peer, Peer) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let u3 = Uuid::new_v4();
        db.create_user(&u1.to_string(), "alice", "alice@example.com")
            .unwrap();
        db.create_user(&u2.to_string(), "bob", "bob@example.com")
            .unwrap();
        db.create_user(&u3.to_string(), "carol", "carol@example.com")
            .unwrap();

        let ledger = MessageLedger::new(db.clone());
        let rooms = RoomDirectory::new(db, ledger.clone());
        let dispatcher = Dispatcher::new(SessionRegistry::new(), rooms, ledger);

        let p1 = connect(&dispatcher, u1).await;
        let p2 = connect(&dispatcher, u2).await;
        let p3 = connect(&dispatcher, u3).await;
        (dispatcher, p1, p2, p3)
    }

    #[tokio::test]
    async fn group_lifecycle_end_to_end() {
        let (dispatcher, mut p1, mut p2, mut p3) = setup().await;

        // u1 creates a GROUP room with [u2, u3]
        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: Some("trio".into()),
                    room_type: RoomType::Group,
                    participants: vec![p2.id, p3.id],
                }),
            )
            .await;

        let room = match p1.next() {
            ServerEvent::RoomCreated(room) => room,
            other => panic!("expected roomCreated, got {other:?}"),
        };
        let mut roster: Vec<Uuid> = room.participants.iter().map(|p| p.id).collect();
        roster.sort();
        let mut expected = vec![p1.id, p2.id, p3.id];
        expected.sort();
        assert_eq!(roster, expected);
        assert!(matches!(p2.next(), ServerEvent::RoomCreated(_)));
        assert!(matches!(p3.next(), ServerEvent::RoomCreated(_)));

        // u1 sends "hi"; both peers receive messageSent with the text
        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::SendMessage(SendMessagePayload {
                    room_id: room.id,
                    text: "hi".into(),
                }),
            )
            .await;

        let message_id = match p2.next() {
            ServerEvent::MessageSent(page) => {
                assert_eq!(page.result[0].text, "hi");
                page.result[0].id
            }
            other => panic!("expected messageSent, got {other:?}"),
        };
        assert!(matches!(p3.next(), ServerEvent::MessageSent(_)));
        assert!(matches!(p1.next(), ServerEvent::MessageSent(_)));

        // u3 tries to delete u1's message: forbidden, message survives
        dispatcher
            .dispatch(
                p3.id,
                p3.conn_id,
                ClientEvent::DeleteMessage(DeleteMessagePayload {
                    room_id: room.id,
                    message_ids: vec![message_id],
                }),
            )
            .await;
        match p3.next() {
            ServerEvent::Exception { status, .. } => assert_eq!(status, "forbidden"),
            other => panic!("expected exception, got {other:?}"),
        }
        p1.assert_silent();
        p2.assert_silent();

        // u1 deletes it: both peers receive messageDeleted with the id
        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::DeleteMessage(DeleteMessagePayload {
                    room_id: room.id,
                    message_ids: vec![message_id],
                }),
            )
            .await;
        for peer in [&mut p1, &mut p2, &mut p3] {
            match peer.next() {
                ServerEvent::MessageDeleted { message_ids } => {
                    assert_eq!(message_ids, vec![message_id])
                }
                other => panic!("expected messageDeleted, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frame_yields_protocol_exception_on_caller_only() {
        let (dispatcher, mut p1, mut p2, _p3) = setup().await;

        dispatcher
            .handle_frame(p1.id, p1.conn_id, "{not json")
            .await;

        match p1.next() {
            ServerEvent::Exception { status, .. } => assert_eq!(status, "protocol"),
            other => panic!("expected exception, got {other:?}"),
        }
        p2.assert_silent();
    }

    #[test]
    fn frame_preview_never_splits_multibyte_chars() {
        let mut frame = "x".repeat(199);
        frame.push('é');
        frame.push_str(&"y".repeat(50));

        let preview = log_preview(&frame);
        assert_eq!(preview.chars().count(), 200);
        assert!(preview.ends_with('é'));

        assert_eq!(log_preview("short"), "short");
    }

    #[tokio::test]
    async fn long_multibyte_malformed_frame_still_gets_exception() {
        let (dispatcher, mut p1, mut p2, _p3) = setup().await;

        // Non-JSON frame longer than the log preview, with a two-byte
        // character straddling the 200-byte mark.
        let mut frame = "x".repeat(199);
        frame.push('é');
        frame.push_str(&"y".repeat(50));

        dispatcher.handle_frame(p1.id, p1.conn_id, &frame).await;

        match p1.next() {
            ServerEvent::Exception { status, .. } => assert_eq!(status, "protocol"),
            other => panic!("expected exception, got {other:?}"),
        }
        p2.assert_silent();
    }

    #[tokio::test]
    async fn fetch_room_details_replies_to_requester_only() {
        let (dispatcher, mut p1, mut p2, _p3) = setup().await;

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: None,
                    room_type: RoomType::Direct,
                    participants: vec![p2.id],
                }),
            )
            .await;
        let room = match p1.next() {
            ServerEvent::RoomCreated(room) => room,
            other => panic!("expected roomCreated, got {other:?}"),
        };
        let _ = p2.next();

        dispatcher
            .dispatch(
                p2.id,
                p2.conn_id,
                ClientEvent::FetchRoomDetails(RoomIdPayload { room_id: room.id }),
            )
            .await;

        assert!(matches!(p2.next(), ServerEvent::RoomDetailsFetched(_)));
        p1.assert_silent();
    }

    #[tokio::test]
    async fn room_deleted_skips_the_acting_deleter() {
        let (dispatcher, mut p1, mut p2, mut p3) = setup().await;

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: None,
                    room_type: RoomType::Group,
                    participants: vec![p2.id, p3.id],
                }),
            )
            .await;
        let room = match p1.next() {
            ServerEvent::RoomCreated(room) => room,
            other => panic!("expected roomCreated, got {other:?}"),
        };
        let _ = p2.next();
        let _ = p3.next();

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::DeleteRoom(RoomIdPayload { room_id: room.id }),
            )
            .await;

        assert!(matches!(p2.next(), ServerEvent::RoomDeleted { .. }));
        assert!(matches!(p3.next(), ServerEvent::RoomDeleted { .. }));
        p1.assert_silent();
    }

    #[tokio::test]
    async fn non_participant_cannot_send_and_nothing_is_persisted() {
        let (dispatcher, mut p1, mut p2, mut p3) = setup().await;

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: None,
                    room_type: RoomType::Direct,
                    participants: vec![p2.id],
                }),
            )
            .await;
        let room = match p1.next() {
            ServerEvent::RoomCreated(room) => room,
            other => panic!("expected roomCreated, got {other:?}"),
        };
        let _ = p2.next();

        dispatcher
            .dispatch(
                p3.id,
                p3.conn_id,
                ClientEvent::SendMessage(SendMessagePayload {
                    room_id: room.id,
                    text: "intrusion".into(),
                }),
            )
            .await;

        match p3.next() {
            ServerEvent::Exception { status, .. } => assert_eq!(status, "forbidden"),
            other => panic!("expected exception, got {other:?}"),
        }
        p1.assert_silent();
        p2.assert_silent();

        let page = dispatcher.messages.find(room.id, None, None, None).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn update_room_fans_out_to_new_roster() {
        let (dispatcher, mut p1, mut p2, mut p3) = setup().await;

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: None,
                    room_type: RoomType::Group,
                    participants: vec![p2.id],
                }),
            )
            .await;
        let room = match p1.next() {
            ServerEvent::RoomCreated(room) => room,
            other => panic!("expected roomCreated, got {other:?}"),
        };
        let _ = p2.next();
        p3.assert_silent();

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::UpdateRoom(UpdateRoomPayload {
                    room_id: room.id,
                    name: Some("grown".into()),
                    participants: Some(vec![p2.id, p3.id]),
                }),
            )
            .await;

        for peer in [&mut p1, &mut p2, &mut p3] {
            match peer.next() {
                ServerEvent::RoomUpdated(updated) => {
                    assert_eq!(updated.name.as_deref(), Some("grown"));
                    assert_eq!(updated.participants.len(), 3);
                }
                other => panic!("expected roomUpdated, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn update_message_fans_out_refreshed_page() {
        let (dispatcher, mut p1, mut p2, _p3) = setup().await;

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: None,
                    room_type: RoomType::Direct,
                    participants: vec![p2.id],
                }),
            )
            .await;
        let room = match p1.next() {
            ServerEvent::RoomCreated(room) => room,
            other => panic!("expected roomCreated, got {other:?}"),
        };
        let _ = p2.next();

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::SendMessage(SendMessagePayload {
                    room_id: room.id,
                    text: "draft".into(),
                }),
            )
            .await;
        let message_id = match p1.next() {
            ServerEvent::MessageSent(page) => page.result[0].id,
            other => panic!("expected messageSent, got {other:?}"),
        };
        let _ = p2.next();

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::UpdateMessage(UpdateMessagePayload {
                    message_id,
                    text: "final".into(),
                }),
            )
            .await;

        for peer in [&mut p1, &mut p2] {
            match peer.next() {
                ServerEvent::MessageUpdated(page) => assert_eq!(page.result[0].text, "final"),
                other => panic!("expected messageUpdated, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn multi_device_actor_receives_one_copy_per_connection() {
        let (dispatcher, mut p1, mut p2, _p3) = setup().await;
        let mut p1_phone = connect(&dispatcher, p1.id).await;

        dispatcher
            .dispatch(
                p1.id,
                p1.conn_id,
                ClientEvent::CreateRoom(CreateRoomPayload {
                    name: None,
                    room_type: RoomType::Direct,
                    participants: vec![p2.id],
                }),
            )
            .await;

        assert!(matches!(p1.next(), ServerEvent::RoomCreated(_)));
        assert!(matches!(p1_phone.next(), ServerEvent::RoomCreated(_)));
        p1.assert_silent();
        p1_phone.assert_silent();
        let _ = p2.next();
    }
}
