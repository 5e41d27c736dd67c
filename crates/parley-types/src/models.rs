use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of conversation container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomType {
    /// Exactly two participants: the creator plus one other.
    Direct,
    /// The creator plus at least one other participant.
    Group,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Direct => "DIRECT",
            RoomType::Group => "GROUP",
        }
    }
}

/// Sanitized user projection embedded in room and message views.
/// Never carries credential fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub room_id: Uuid,
    pub text: String,
    /// Author's public profile.
    pub user: UserView,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One page of messages, newest first, plus the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub result: Vec<MessageView>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub id: Uuid,
    pub name: Option<String>,
    pub room_type: RoomType,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<UserView>,
    /// Populated only on the initial per-user snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_messages: Option<MessagePage>,
}
