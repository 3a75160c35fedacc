use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActivityAction, Role};

/// Display-friendly projection of a user, resolved at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub account: String,
}

impl UserSummary {
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    /// Sentinel for an actor that no longer exists in the user directory.
    #[must_use]
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            name: Self::UNKNOWN_NAME.to_owned(),
            account: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSummary {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub owner: UserSummary,
    pub file_count: u64,
    pub member_count: u64,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDetail {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_token: String,
    pub default_join_role: Role,
    pub own_files_only: bool,
    pub my_role: Role,
    pub my_user_id: Uuid,
    pub members: Vec<MemberView>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    /// Membership identifier, used by the role-change and removal routes.
    pub id: Uuid,
    pub user: UserSummary,
    pub role: Role,
    pub joined_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileView {
    pub id: Uuid,
    pub name: String,
    pub media_type: String,
    pub size: u64,
    pub uploaded_by: Option<Uuid>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: Uuid,
    pub action: ActivityAction,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
    pub actor: UserSummary,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPage {
    pub items: Vec<ActivityItem>,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSpaceRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSpaceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub own_files_only: Option<bool>,
    #[serde(default)]
    pub default_join_role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteMemberRequest {
    pub account: String,
    #[serde(default = "default_invite_role")]
    pub role: Role,
}

fn default_invite_role() -> Role {
    Role::Member
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameFileRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPreview {
    pub space_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResult {
    pub space_id: Uuid,
    pub space_name: String,
    pub role: Role,
    pub already_member: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStrategy {
    Push,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeStrategyInfo {
    pub strategy: DeliveryStrategy,
    pub poll_interval_secs: u64,
}

/// ErrorResponse represents an error response from HTTP JSON APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "error")]
    pub error: String,
    #[serde(rename = "code")]
    pub code: String,
}
