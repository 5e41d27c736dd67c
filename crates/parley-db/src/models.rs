/// Database row types — these map directly to SQLite rows.
/// Distinct from the parley-types API views to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub name: Option<String>,
    pub room_type: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ParticipantRow {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub text: String,
    pub created_by: String,
    pub updated_by: String,
    pub author_username: String,
    pub created_at: String,
    pub updated_at: String,
}
