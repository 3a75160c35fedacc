use std::collections::HashSet;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use spaceshare_auth::{generate_invite_token, Action, AuthContext};
use spaceshare_core::protocol::{
    CreateSpaceRequest, SpaceDetail, SpaceEvent, SpaceSummary, UpdateSpaceRequest,
};
use spaceshare_core::validation::{validate_join_role, validate_space_name};
use spaceshare_core::{ActivityAction, Role};
use spaceshare_storage::{NewSpace, SpaceRecord, SpaceUpdate};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{json_body, parse_id, SpaceAccess};
use crate::views::{member_view, resolve_user, unix_millis};
use crate::{ApiError, ApiState};

pub(crate) async fn list_spaces(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<SpaceSummary>>, ApiError> {
    let listings = state.storage.list_spaces_for_user(auth.user_id).await?;
    let owner_ids: Vec<Uuid> = listings
        .iter()
        .map(|listing| listing.space.owner_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let owners = state.storage.get_users(&owner_ids).await?;

    let summaries = listings
        .into_iter()
        .map(|listing| SpaceSummary {
            id: listing.space.id,
            owner: resolve_user(&owners, listing.space.owner_id),
            name: listing.space.name,
            role: listing.role,
            file_count: listing.file_count,
            member_count: listing.member_count,
            created_at_ms: unix_millis(listing.space.created_at),
        })
        .collect();
    Ok(Json(summaries))
}

pub(crate) async fn create_space(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<CreateSpaceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SpaceDetail>), ApiError> {
    let request = json_body(payload)?;
    let name = validate_space_name(&request.name)?;

    let space = state
        .storage
        .create_space(&NewSpace {
            id: Uuid::new_v4(),
            name: name.clone(),
            owner_id: auth.user_id,
            invite_token: Some(generate_invite_token()),
            default_join_role: Role::Member,
            own_files_only: false,
        })
        .await?;
    info!(space_id = %space.id, owner = %auth.user_id, "created space");

    state
        .record_activity(
            space.id,
            auth.user_id,
            ActivityAction::SpaceCreate,
            Some(name),
            None,
        )
        .await;

    let access = SpaceAccess::load(&state, space.id, auth.user_id).await?;
    let detail = space_detail(&state, access).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub(crate) async fn get_space(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
) -> Result<Json<SpaceDetail>, ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::View)?;
    Ok(Json(space_detail(&state, access).await?))
}

pub(crate) async fn update_space(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
    payload: Result<Json<UpdateSpaceRequest>, JsonRejection>,
) -> Result<Json<SpaceDetail>, ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::ManageSpace)?;

    let request = json_body(payload)?;
    let update = SpaceUpdate {
        name: request
            .name
            .as_deref()
            .map(validate_space_name)
            .transpose()?,
        own_files_only: request.own_files_only,
        default_join_role: request
            .default_join_role
            .map(validate_join_role)
            .transpose()?,
    };
    if update.is_empty() {
        return Ok(Json(space_detail(&state, access).await?));
    }

    let space = state.storage.update_space(space_id, &update).await?;
    if let Some(name) = update.name {
        state
            .record_activity(
                space_id,
                auth.user_id,
                ActivityAction::SpaceRename,
                Some(name),
                None,
            )
            .await;
    }

    let access = SpaceAccess {
        space,
        membership: access.membership,
    };
    Ok(Json(space_detail(&state, access).await?))
}

pub(crate) async fn delete_space(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::ManageSpace)?;

    let files = state.storage.delete_space(space_id).await?;
    if let Err(error) = state.blobs.delete_space(space_id).await {
        warn!(%space_id, error = %error, "failed to release space blobs");
    }
    state
        .hub
        .publish(space_id, SpaceEvent::MembershipChanged)
        .await;
    state.hub.close_space(space_id).await;
    info!(%space_id, files = files.len(), "deleted space");

    Ok(StatusCode::NO_CONTENT)
}

/// Builds the detail view, issuing the invite token on first view.
async fn space_detail(state: &ApiState, access: SpaceAccess) -> Result<SpaceDetail, ApiError> {
    let SpaceAccess { space, membership } = access;
    let invite_token = ensure_invite_token(state, &space).await?;

    let memberships = state.storage.list_members(space.id).await?;
    let user_ids: Vec<Uuid> = memberships.iter().map(|member| member.user_id).collect();
    let users = state.storage.get_users(&user_ids).await?;
    let members = memberships
        .iter()
        .map(|member| member_view(member, &users))
        .collect();

    Ok(SpaceDetail {
        id: space.id,
        name: space.name,
        owner_id: space.owner_id,
        invite_token,
        default_join_role: space.default_join_role,
        own_files_only: space.own_files_only,
        my_role: membership.role,
        my_user_id: membership.user_id,
        members,
        created_at_ms: unix_millis(space.created_at),
    })
}

async fn ensure_invite_token(state: &ApiState, space: &SpaceRecord) -> Result<String, ApiError> {
    if let Some(token) = &space.invite_token {
        return Ok(token.clone());
    }
    Ok(state
        .storage
        .ensure_invite_token(space.id, &generate_invite_token())
        .await?)
}
