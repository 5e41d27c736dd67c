use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessagePage, RoomType, RoomView};

/// Events sent FROM client TO server over the WebSocket.
///
/// The tag/content encoding doubles as the event registry: serde resolves the
/// event name to a typed payload decoder, dispatch is a plain match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    CreateRoom(CreateRoomPayload),
    FetchRoomDetails(RoomIdPayload),
    UpdateRoom(UpdateRoomPayload),
    DeleteRoom(RoomIdPayload),
    SendMessage(SendMessagePayload),
    GetAllMessages(FilterMessagesPayload),
    UpdateMessage(UpdateMessagePayload),
    DeleteMessage(DeleteMessagePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomPayload {
    pub name: Option<String>,
    pub room_type: RoomType,
    /// Target roster, excluding the actor (the actor is implicit).
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomIdPayload {
    pub room_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRoomPayload {
    pub room_id: Uuid,
    pub name: Option<String>,
    /// When present, fully replaces the membership set (actor re-added).
    pub participants: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub room_id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterMessagesPayload {
    pub room_id: Uuid,
    /// Case-insensitive substring match on the message text.
    pub filter: Option<String>,
    /// Page offset, defaults to 0.
    pub first: Option<u64>,
    /// Page size, defaults to 20.
    pub rows: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMessagePayload {
    pub message_id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessagePayload {
    pub room_id: Uuid,
    pub message_ids: Vec<Uuid>,
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Initial snapshot pushed once after a successful connect.
    UserRooms(Vec<RoomView>),
    RoomCreated(RoomView),
    RoomDetailsFetched(RoomView),
    RoomUpdated(RoomView),
    RoomDeleted { message: String },
    MessageSent(MessagePage),
    AllMessages(MessagePage),
    MessageUpdated(MessagePage),
    MessageDeleted { message_ids: Vec<Uuid> },
    /// Caller-facing error wrapper: status marker plus a readable message.
    Exception { status: String, message: String },
}
