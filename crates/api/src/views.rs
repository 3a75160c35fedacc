use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use spaceshare_core::protocol::{FileView, MemberView, UserSummary};
use spaceshare_storage::{FileRecord, MembershipRecord, UserRecord};
use uuid::Uuid;

pub(crate) fn unix_millis(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

pub(crate) fn user_summary(user: &UserRecord) -> UserSummary {
    UserSummary {
        id: user.id,
        name: user.display_name.clone(),
        account: user.account.clone(),
    }
}

pub(crate) fn resolve_user(users: &HashMap<Uuid, UserRecord>, user_id: Uuid) -> UserSummary {
    users
        .get(&user_id)
        .map(user_summary)
        .unwrap_or_else(|| UserSummary::unknown(user_id))
}

pub(crate) fn file_view(file: &FileRecord) -> FileView {
    FileView {
        id: file.id,
        name: file.name.clone(),
        media_type: file.media_type.clone(),
        size: file.size,
        uploaded_by: file.uploaded_by,
        created_at_ms: unix_millis(file.created_at),
        updated_at_ms: unix_millis(file.updated_at),
    }
}

pub(crate) fn member_view(
    membership: &MembershipRecord,
    users: &HashMap<Uuid, UserRecord>,
) -> MemberView {
    MemberView {
        id: membership.id,
        user: resolve_user(users, membership.user_id),
        role: membership.role,
        joined_at_ms: unix_millis(membership.created_at),
    }
}
