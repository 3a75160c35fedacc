use axum::extract::rejection::JsonRejection;
use axum::Json;
use spaceshare_auth::{evaluate, Action, Decision, FileOwnership};
use spaceshare_core::Role;
use spaceshare_storage::{FileRecord, MembershipRecord, SpaceRecord};
use uuid::Uuid;

use crate::{ApiError, ApiState};

/// The caller's standing in one space.
pub(crate) struct SpaceAccess {
    pub space: SpaceRecord,
    pub membership: MembershipRecord,
}

impl SpaceAccess {
    pub(crate) async fn load(
        state: &ApiState,
        space_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self, ApiError> {
        let Some(membership) = state.storage.get_membership(space_id, user_id).await? else {
            return Err(ApiError::Forbidden("not a member of this space"));
        };
        let space = state.storage.get_space(space_id).await?;
        Ok(Self { space, membership })
    }

    pub(crate) fn role(&self) -> Role {
        self.membership.role
    }

    pub(crate) fn require(&self, action: Action) -> Result<(), ApiError> {
        into_result(evaluate(self.role(), action, None))
    }

    /// Role capability and, when the space restricts members to their own
    /// uploads, the uploader check.
    pub(crate) fn require_on_file(&self, action: Action, file: &FileRecord) -> Result<(), ApiError> {
        let ownership = FileOwnership {
            own_files_only: self.space.own_files_only,
            uploaded_by: file.uploaded_by,
            actor: self.membership.user_id,
        };
        into_result(evaluate(self.role(), action, Some(&ownership)))
    }

    /// Uploader filter for listings: non-admins only see their own files when
    /// the space is restricted.
    pub(crate) fn listing_filter(&self) -> Option<Uuid> {
        (self.space.own_files_only && !self.role().is_admin()).then_some(self.membership.user_id)
    }
}

fn into_result(decision: Decision) -> Result<(), ApiError> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(reason.into()),
    }
}

pub(crate) fn parse_id(raw: &str, field: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::invalid(field))
}

/// Unwraps a JSON body, reporting malformed input as a validation error.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}
