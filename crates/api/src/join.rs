use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use spaceshare_auth::AuthContext;
use spaceshare_core::protocol::{JoinPreview, JoinRequest, JoinResult, SpaceEvent};
use spaceshare_core::{ActivityAction, Role};
use spaceshare_storage::{SpaceRecord, StorageError};
use tracing::info;

use crate::access::json_body;
use crate::{ApiError, ApiState};

const INVITE_TARGET: &str = "via invite link";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PreviewQuery {
    token: Option<String>,
}

/// Unauthenticated: shows what an invite link leads to.
pub(crate) async fn preview_invite(
    State(state): State<ApiState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<JoinPreview>, ApiError> {
    let space = find_invited_space(&state, query.token.as_deref()).await?;
    Ok(Json(JoinPreview {
        space_name: space.name,
        role: space.default_join_role,
    }))
}

pub(crate) async fn redeem_invite(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<JoinResult>, ApiError> {
    let request = json_body(payload)?;
    let space = find_invited_space(&state, Some(&request.token)).await?;

    if let Some(existing) = state.storage.get_membership(space.id, auth.user_id).await? {
        return Ok(Json(already_member(space, existing.role)));
    }

    let membership = match state
        .storage
        .add_member(space.id, auth.user_id, space.default_join_role)
        .await
    {
        Ok(membership) => membership,
        Err(StorageError::MembershipExists) => {
            let role = state
                .storage
                .get_membership(space.id, auth.user_id)
                .await?
                .map_or(space.default_join_role, |existing| existing.role);
            return Ok(Json(already_member(space, role)));
        }
        Err(error) => return Err(error.into()),
    };
    info!(space_id = %space.id, user_id = %auth.user_id, "joined space via invite");

    state
        .record_activity(
            space.id,
            auth.user_id,
            ActivityAction::MemberAdd,
            Some(INVITE_TARGET.to_owned()),
            Some(json!({ "role": membership.role })),
        )
        .await;
    state.hub.publish(space.id, SpaceEvent::MembershipChanged).await;

    Ok(Json(JoinResult {
        space_id: space.id,
        space_name: space.name,
        role: membership.role,
        already_member: false,
    }))
}

async fn find_invited_space(
    state: &ApiState,
    token: Option<&str>,
) -> Result<SpaceRecord, ApiError> {
    let token = token.map(str::trim).unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::Validation("token required".to_owned()));
    }
    Ok(state.storage.find_space_by_invite_token(token).await?)
}

fn already_member(space: SpaceRecord, role: Role) -> JoinResult {
    JoinResult {
        space_id: space.id,
        space_name: space.name,
        role,
        already_member: true,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use spaceshare_core::Role;
    use spaceshare_storage::{SpaceStorage, SpaceUpdate};
    use uuid::Uuid;

    use crate::test_support::TestApp;

    async fn invite_token(app: &TestApp, space_id: Uuid) -> String {
        app.storage
            .ensure_invite_token(space_id, "invite-abc")
            .await
            .expect("ensure invite token")
    }

    #[tokio::test]
    async fn preview_needs_no_session() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Robotics").await;
        let token = invite_token(&app, space_id).await;

        let (status, preview) = app
            .call("GET", &format!("/api/v1/join?token={token}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview, json!({ "space_name": "Robotics", "role": "member" }));

        let (status, body) = app.call("GET", "/api/v1/join?token=stale", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "invalid invite link");

        let (status, _) = app.call("GET", "/api/v1/join", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn redeem_requires_session() {
        let app = TestApp::new().await;
        let (status, _) = app
            .call("POST", "/api/v1/join", None, Some(json!({ "token": "x" })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn redeeming_twice_is_idempotent() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let guest = app.user("21CS002", "Ravi").await;
        let space_id = app.space(&owner, "Robotics").await;
        app.storage
            .update_space(
                space_id,
                &SpaceUpdate {
                    default_join_role: Some(Role::Viewer),
                    ..SpaceUpdate::default()
                },
            )
            .await
            .expect("set join role");
        let token = invite_token(&app, space_id).await;
        let body = json!({ "token": token });

        let (status, first) = app
            .call("POST", "/api/v1/join", Some(&guest), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["space_id"], space_id.to_string());
        assert_eq!(first["role"], "viewer");
        assert_eq!(first["already_member"], false);

        let (status, second) = app
            .call("POST", "/api/v1/join", Some(&guest), Some(body))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["already_member"], true);

        let (_, members) = app
            .call("GET", &format!("/api/v1/spaces/{space_id}/members"), Some(&owner), None)
            .await;
        assert_eq!(members.as_array().map(Vec::len), Some(2));

        let (_, activity) = app
            .call("GET", &format!("/api/v1/spaces/{space_id}/activity"), Some(&owner), None)
            .await;
        let items = activity["items"].as_array().expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["action"], "member_add");
        assert_eq!(items[0]["target"], "via invite link");
        assert_eq!(items[0]["actor"]["name"], "Ravi");
    }

    #[tokio::test]
    async fn existing_admin_keeps_role() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Robotics").await;
        let token = invite_token(&app, space_id).await;

        let (status, result) = app
            .call("POST", "/api/v1/join", Some(&owner), Some(json!({ "token": token })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["role"], "admin");
        assert_eq!(result["already_member"], true);
    }
}
