use std::collections::HashSet;

use parley_types::models::RoomType;
use uuid::Uuid;

use crate::ChatError;

/// Room-shape rules, shared verbatim by room creation and membership updates.
/// Pure validation, no I/O. The supplied list is the target roster *excluding*
/// the actor — the actor is implicit and appended by the system.
pub fn validate_room_shape(
    actor: Uuid,
    room_type: RoomType,
    participants: &[Uuid],
) -> Result<(), ChatError> {
    if participants.contains(&actor) {
        return Err(ChatError::Validation(
            "The room owner or updater should not be included in the participants list.".into(),
        ));
    }

    if room_type == RoomType::Direct && participants.len() != 1 {
        return Err(ChatError::Validation(
            "Direct chat must include exactly one participant aside from the room owner or updater."
                .into(),
        ));
    }

    if room_type == RoomType::Group && participants.is_empty() {
        return Err(ChatError::Validation(
            "Group chat must include at least one participant aside from the room owner or updater."
                .into(),
        ));
    }

    let unique: HashSet<&Uuid> = participants.iter().collect();
    if unique.len() != participants.len() {
        return Err(ChatError::Validation(
            "The participants list contains duplicates.".into(),
        ));
    }

    Ok(())
}
