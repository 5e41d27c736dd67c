//! Row-to-view conversion. Corrupt stored values are logged and defaulted
//! rather than failing the whole response.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::models::{MessageRow, ParticipantRow, RoomRow};
use parley_types::models::{MessageView, RoomType, RoomView, UserView};

use crate::ChatError;

pub(crate) fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}': {}", raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite column defaults store "YYYY-MM-DD HH:MM:SS" without a
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub(crate) fn room_type_from_str(raw: &str) -> Result<RoomType, ChatError> {
    match raw {
        "DIRECT" => Ok(RoomType::Direct),
        "GROUP" => Ok(RoomType::Group),
        other => Err(ChatError::Internal(anyhow::anyhow!(
            "unknown room type '{other}' in store"
        ))),
    }
}

pub(crate) fn message_view(row: MessageRow) -> MessageView {
    let author = parse_id(&row.created_by);
    MessageView {
        id: parse_id(&row.id),
        room_id: parse_id(&row.room_id),
        text: row.text,
        user: UserView {
            id: author,
            username: row.author_username,
        },
        created_by: author,
        updated_by: parse_id(&row.updated_by),
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    }
}

pub(crate) fn room_view(
    room: RoomRow,
    participants: Vec<ParticipantRow>,
) -> Result<RoomView, ChatError> {
    let room_type = room_type_from_str(&room.room_type)?;
    Ok(RoomView {
        id: parse_id(&room.id),
        name: room.name,
        room_type,
        created_by: parse_id(&room.created_by),
        updated_by: parse_id(&room.updated_by),
        created_at: parse_ts(&room.created_at),
        updated_at: parse_ts(&room.updated_at),
        participants: participants
            .into_iter()
            .map(|p| UserView {
                id: parse_id(&p.user_id),
                username: p.username,
            })
            .collect(),
        latest_messages: None,
    })
}
