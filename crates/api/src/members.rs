use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use spaceshare_auth::{Action, AuthContext};
use spaceshare_core::protocol::{ChangeRoleRequest, InviteMemberRequest, MemberView, SpaceEvent};
use spaceshare_core::validation::validate_account;
use spaceshare_core::ActivityAction;
use spaceshare_storage::MembershipRecord;
use uuid::Uuid;

use crate::access::{json_body, parse_id, SpaceAccess};
use crate::guard::{GuardDecision, MembershipGuard};
use crate::views::{member_view, resolve_user};
use crate::{ApiError, ApiState};

#[derive(Debug, serde::Deserialize)]
pub(crate) struct MemberPathParams {
    pub space_id: String,
    pub member_id: String,
}

pub(crate) async fn list_members(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
) -> Result<Json<Vec<MemberView>>, ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::View)?;

    let memberships = state.storage.list_members(space_id).await?;
    let user_ids: Vec<Uuid> = memberships.iter().map(|member| member.user_id).collect();
    let users = state.storage.get_users(&user_ids).await?;
    Ok(Json(
        memberships
            .iter()
            .map(|member| member_view(member, &users))
            .collect(),
    ))
}

pub(crate) async fn add_member(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
    payload: Result<Json<InviteMemberRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MemberView>), ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::ManageMembers)?;

    let request = json_body(payload)?;
    let account = validate_account(&request.account)?;
    let user = state.storage.find_user_by_account(&account).await?;
    let membership = state
        .storage
        .add_member(space_id, user.id, request.role)
        .await?;

    state
        .record_activity(
            space_id,
            auth.user_id,
            ActivityAction::MemberAdd,
            Some(user.account.clone()),
            Some(json!({ "role": request.role })),
        )
        .await;
    state
        .hub
        .publish(space_id, SpaceEvent::MembershipChanged)
        .await;

    let users = [(user.id, user)].into_iter().collect();
    Ok((StatusCode::CREATED, Json(member_view(&membership, &users))))
}

pub(crate) async fn change_role(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<MemberPathParams>,
    payload: Result<Json<ChangeRoleRequest>, JsonRejection>,
) -> Result<Json<MemberView>, ApiError> {
    let (space_id, membership_id) = parse_member_path(&path)?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    let request = json_body(payload)?;

    if !request.role.is_admin() {
        check_guard(&state, space_id, membership_id).await?;
    }
    access.require(Action::ManageMembers)?;

    let updated = state
        .storage
        .change_member_role(space_id, membership_id, request.role)
        .await?;
    let users = state.storage.get_users(&[updated.user_id]).await?;
    let target = resolve_user(&users, updated.user_id);

    state
        .record_activity(
            space_id,
            auth.user_id,
            ActivityAction::MemberRole,
            Some(target.account),
            Some(json!({ "role": request.role })),
        )
        .await;
    state
        .hub
        .publish(space_id, SpaceEvent::MembershipChanged)
        .await;

    Ok(Json(member_view(&updated, &users)))
}

pub(crate) async fn remove_member(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<MemberPathParams>,
) -> Result<StatusCode, ApiError> {
    let (space_id, membership_id) = parse_member_path(&path)?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;

    check_guard(&state, space_id, membership_id).await?;
    access.require(Action::ManageMembers)?;

    let removed = state.storage.remove_member(space_id, membership_id).await?;
    state.hub.revoke_user(space_id, removed.user_id).await;

    let target = removed_account(&state, &removed).await;
    state
        .record_activity(
            space_id,
            auth.user_id,
            ActivityAction::MemberRemove,
            target,
            None,
        )
        .await;
    state
        .hub
        .publish(space_id, SpaceEvent::MembershipChanged)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn check_guard(state: &ApiState, space_id: Uuid, membership_id: Uuid) -> Result<(), ApiError> {
    let check = MembershipGuard::new(state.storage.as_ref())
        .can_remove_or_demote(space_id, membership_id)
        .await?;
    match check.decision {
        GuardDecision::Allowed => Ok(()),
        GuardDecision::Denied(denial) => Err(ApiError::Conflict(denial.reason())),
    }
}

async fn removed_account(state: &ApiState, removed: &MembershipRecord) -> Option<String> {
    let users = state.storage.get_users(&[removed.user_id]).await.ok()?;
    users.get(&removed.user_id).map(|user| user.account.clone())
}

fn parse_member_path(path: &MemberPathParams) -> Result<(Uuid, Uuid), ApiError> {
    Ok((
        parse_id(&path.space_id, "space ID")?,
        parse_id(&path.member_id, "member ID")?,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;
    use spaceshare_core::Role;
    use spaceshare_storage::MembershipStorage;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn add_member_by_account() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let invitee = app.user("21CS002", "Ravi").await;
        let space_id = app.space(&owner, "Team").await;
        let uri = format!("/api/v1/spaces/{space_id}/members");

        let (status, added) = app
            .call("POST", &uri, Some(&owner), Some(json!({ "account": "21CS002", "role": "viewer" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(added["role"], "viewer");
        assert_eq!(added["user"]["name"], "Ravi");

        let (status, body) = app
            .call("POST", &uri, Some(&owner), Some(json!({ "account": "21CS002" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "user already in space");

        let (status, _) = app
            .call("POST", &uri, Some(&owner), Some(json!({ "account": "NOPE" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .call("POST", &uri, Some(&invitee), Some(json!({ "account": "21CS001" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, members) = app.call("GET", &uri, Some(&invitee), None).await;
        assert_eq!(members.as_array().map(Vec::len), Some(2));

        let (_, activity) = app
            .call("GET", &format!("/api/v1/spaces/{space_id}/activity"), Some(&owner), None)
            .await;
        assert_eq!(activity["items"][0]["action"], "member_add");
        assert_eq!(activity["items"][0]["target"], "21CS002");
        assert_eq!(activity["items"][0]["metadata"], json!({ "role": "viewer" }));
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted_by_anyone() {
        let app = TestApp::new().await;
        let admin = app.user("21CS001", "Asha").await;
        let member = app.user("21CS002", "Ravi").await;
        let space_id = app.space(&admin, "Team").await;
        let member_id = app.join(space_id, &member, Role::Member).await;
        let admin_id = app.membership_id(space_id, &admin).await;
        let admin_uri = format!("/api/v1/spaces/{space_id}/members/{admin_id}");

        let (status, body) = app
            .call("PATCH", &admin_uri, Some(&member), Some(json!({ "role": "member" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "last admin");

        let (status, _) = app
            .call(
                "PATCH",
                &format!("/api/v1/spaces/{space_id}/members/{member_id}"),
                Some(&admin),
                Some(json!({ "role": "admin" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, demoted) = app
            .call("PATCH", &admin_uri, Some(&admin), Some(json!({ "role": "member" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(demoted["role"], "member");
        assert_eq!(app.storage.count_admins(space_id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn members_cannot_change_roles() {
        let app = TestApp::new().await;
        let admin = app.user("21CS001", "Asha").await;
        let member = app.user("21CS002", "Ravi").await;
        let viewer = app.user("21CS003", "Meera").await;
        let space_id = app.space(&admin, "Team").await;
        app.join(space_id, &member, Role::Member).await;
        let viewer_id = app.join(space_id, &viewer, Role::Viewer).await;

        let (status, _) = app
            .call(
                "PATCH",
                &format!("/api/v1/spaces/{space_id}/members/{viewer_id}"),
                Some(&member),
                Some(json!({ "role": "member" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn remove_member_and_protect_last_admin() {
        let app = TestApp::new().await;
        let admin = app.user("21CS001", "Asha").await;
        let member = app.user("21CS002", "Ravi").await;
        let space_id = app.space(&admin, "Team").await;
        let member_id = app.join(space_id, &member, Role::Member).await;
        let admin_id = app.membership_id(space_id, &admin).await;

        let (status, body) = app
            .call(
                "DELETE",
                &format!("/api/v1/spaces/{space_id}/members/{admin_id}"),
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");

        let (status, _) = app
            .call(
                "DELETE",
                &format!("/api/v1/spaces/{space_id}/members/{member_id}"),
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .call("GET", &format!("/api/v1/spaces/{space_id}"), Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, activity) = app
            .call("GET", &format!("/api/v1/spaces/{space_id}/activity"), Some(&admin), None)
            .await;
        assert_eq!(activity["items"][0]["action"], "member_remove");
        assert_eq!(activity["items"][0]["target"], "21CS002");
    }

    #[tokio::test]
    async fn concurrent_admin_removals_keep_one_admin() {
        let app = Arc::new(TestApp::new().await);
        let first = app.user("21CS001", "Asha").await;
        let second = app.user("21CS002", "Ravi").await;
        let space_id = app.space(&first, "Team").await;
        app.join(space_id, &second, Role::Admin).await;
        let first_id = app.membership_id(space_id, &first).await;
        let second_id = app.membership_id(space_id, &second).await;

        let removals = [(first.clone(), second_id), (second.clone(), first_id)].map(
            |(caller, target)| {
                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    app.call(
                        "DELETE",
                        &format!("/api/v1/spaces/{space_id}/members/{target}"),
                        Some(&caller),
                        None,
                    )
                    .await
                    .0
                })
            },
        );

        let mut statuses = Vec::new();
        for removal in removals {
            statuses.push(removal.await.expect("join removal"));
        }
        assert!(statuses.contains(&StatusCode::NO_CONTENT));
        assert_eq!(app.storage.count_admins(space_id).await.expect("count"), 1);
    }
}
