use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{Extension, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use spaceshare_auth::{Action, AuthContext};
use spaceshare_core::protocol::{FileView, RenameFileRequest, SpaceEvent};
use spaceshare_core::validation::{
    file_too_large, normalize_media_type, sanitize_file_name, validate_file_name,
    validate_file_size, MAX_FILE_SIZE,
};
use spaceshare_core::ActivityAction;
use spaceshare_storage::{FileRecord, NewFile};
use tracing::warn;
use uuid::Uuid;

use crate::access::{json_body, parse_id, SpaceAccess};
use crate::blobs::BlobDeletion;
use crate::views::file_view;
use crate::{ApiError, ApiState};

pub(crate) const FILE_NAME_HEADER: &str = "X-File-Name";
/// Room for one byte past the limit so oversized bodies reach validation.
pub(crate) const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE as usize + 1;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct FilePathParams {
    pub space_id: String,
    pub file_id: String,
}

pub(crate) async fn list_files(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
) -> Result<Json<Vec<FileView>>, ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::View)?;

    let files = state
        .storage
        .list_files(space_id, access.listing_filter())
        .await?;
    Ok(Json(files.iter().map(file_view).collect()))
}

pub(crate) async fn upload_file(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<FileView>), ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::Upload)?;

    let name = match header_to_str(&headers, FILE_NAME_HEADER) {
        Some(raw) => validate_file_name(raw)?,
        None => return Err(ApiError::Validation("X-File-Name header required".to_owned())),
    };
    let media_type = normalize_media_type(header_to_str(&headers, CONTENT_TYPE.as_str()))?;
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::from(file_too_large(MAX_FILE_SIZE))
        } else {
            ApiError::Validation(rejection.body_text())
        }
    })?;
    let size = body.len() as u64;
    validate_file_size(size)?;

    if !state.upload_limiter.try_admit(auth.user_id).await {
        return Err(ApiError::RateLimited);
    }

    let storage_id = state.blobs.store(space_id, &media_type, body).await?;
    let created = state
        .storage
        .create_file(&NewFile {
            id: Uuid::new_v4(),
            space_id,
            name: name.clone(),
            media_type,
            size,
            storage_id: storage_id.clone(),
            uploaded_by: Some(auth.user_id),
        })
        .await;
    let file = match created {
        Ok(file) => file,
        Err(error) => {
            if let Err(cleanup) = state.blobs.delete(&storage_id).await {
                warn!(%space_id, %storage_id, error = %cleanup, "failed to release orphaned blob");
            }
            return Err(error.into());
        }
    };

    let view = file_view(&file);
    state
        .record_activity(space_id, auth.user_id, ActivityAction::Upload, Some(name), None)
        .await;
    state
        .hub
        .publish(space_id, SpaceEvent::FileUpserted(view.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(view)))
}

pub(crate) async fn download_file(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<FilePathParams>,
) -> Result<Response, ApiError> {
    let (_, file) = resolve_file(&state, &auth, &path, Action::View).await?;

    let blob = state.blobs.fetch(&file.storage_id).await?;
    let mut response = blob.bytes.into_response();
    write_file_headers(response.headers_mut(), &file);
    Ok(response)
}

pub(crate) async fn rename_file(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<FilePathParams>,
    payload: Result<Json<RenameFileRequest>, JsonRejection>,
) -> Result<Json<FileView>, ApiError> {
    let (access, file) = resolve_file(&state, &auth, &path, Action::DeleteOrRenameFile).await?;
    let request = json_body(payload)?;
    let name = validate_file_name(&request.name)?;

    let renamed = state
        .storage
        .rename_file(access.space.id, file.id, &name)
        .await?;
    let view = file_view(&renamed);

    state
        .record_activity(
            access.space.id,
            auth.user_id,
            ActivityAction::Rename,
            Some(name),
            Some(json!({ "from": file.name })),
        )
        .await;
    state
        .hub
        .publish(access.space.id, SpaceEvent::FileUpserted(view.clone()))
        .await;

    Ok(Json(view))
}

pub(crate) async fn delete_file(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<FilePathParams>,
) -> Result<StatusCode, ApiError> {
    let (access, file) = resolve_file(&state, &auth, &path, Action::DeleteOrRenameFile).await?;
    let space_id = access.space.id;

    if state.blobs.delete(&file.storage_id).await? == BlobDeletion::NotFound {
        warn!(%space_id, file_id = %file.id, "file content was already gone");
    }
    let deleted = state.storage.delete_file(space_id, file.id).await?;

    state
        .record_activity(
            space_id,
            auth.user_id,
            ActivityAction::Delete,
            Some(deleted.name),
            None,
        )
        .await;
    state
        .hub
        .publish(space_id, SpaceEvent::FileDeleted { id: deleted.id })
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Loads a file after the role check, then applies the uploader check.
async fn resolve_file(
    state: &ApiState,
    auth: &AuthContext,
    path: &FilePathParams,
    action: Action,
) -> Result<(SpaceAccess, FileRecord), ApiError> {
    let space_id = parse_id(&path.space_id, "space ID")?;
    let file_id = parse_id(&path.file_id, "file ID")?;
    let access = SpaceAccess::load(state, space_id, auth.user_id).await?;
    access.require(action)?;

    let file = state.storage.get_file(space_id, file_id).await?;
    access.require_on_file(action, &file)?;
    Ok((access, file))
}

fn write_file_headers(headers: &mut HeaderMap, file: &FileRecord) {
    if let Ok(value) = HeaderValue::from_str(&file.media_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_file_name(&file.name)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
}

fn header_to_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use spaceshare_core::Role;
    use spaceshare_storage::{SpaceStorage, SpaceUpdate};
    use uuid::Uuid;

    use crate::test_support::{read_json, TestApp, TestUser};
    use crate::{UploadQuota, UploadRateLimiter};

    async fn upload(
        app: &TestApp,
        space_id: Uuid,
        user: &TestUser,
        name: &str,
        media_type: &str,
        payload: &'static [u8],
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .dispatch(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/spaces/{space_id}/files"))
                    .header(AUTHORIZATION, format!("Bearer {}", user.token))
                    .header(CONTENT_TYPE, media_type)
                    .header("X-File-Name", name)
                    .body(Body::from(payload))
                    .expect("build request"),
            )
            .await;
        let status = response.status();
        (status, read_json(response).await)
    }

    async fn restrict_to_own_files(app: &TestApp, space_id: Uuid) {
        app.storage
            .update_space(
                space_id,
                &SpaceUpdate {
                    own_files_only: Some(true),
                    ..SpaceUpdate::default()
                },
            )
            .await
            .expect("restrict space");
    }

    #[tokio::test]
    async fn upload_list_and_download() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Team").await;

        let (status, uploaded) = upload(
            &app,
            space_id,
            &owner,
            "lab report.pdf",
            "application/pdf",
            b"%PDF-1.7",
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(uploaded["name"], "lab report.pdf");
        assert_eq!(uploaded["media_type"], "application/pdf");
        assert_eq!(uploaded["size"], 8);
        assert_eq!(uploaded["uploaded_by"], owner.id.to_string());

        let (status, listed) = app
            .call("GET", &format!("/api/v1/spaces/{space_id}/files"), Some(&owner), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["id"], uploaded["id"]);

        let file_id = uploaded["id"].as_str().expect("file id");
        let response = app
            .dispatch(
                Request::builder()
                    .uri(format!("/api/v1/spaces/{space_id}/files/{file_id}"))
                    .header(AUTHORIZATION, format!("Bearer {}", owner.token))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/pdf")
        );
        assert_eq!(
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok()),
            Some("attachment; filename=\"lab_report.pdf\"")
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(body.as_ref(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn viewers_cannot_upload_but_can_download() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let viewer = app.user("21CS002", "Ravi").await;
        let space_id = app.space(&owner, "Team").await;
        app.join(space_id, &viewer, Role::Viewer).await;

        let (status, body) = upload(&app, space_id, &viewer, "a.txt", "text/plain", b"a").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (_, uploaded) = upload(&app, space_id, &owner, "a.txt", "text/plain", b"a").await;
        let file_id = uploaded["id"].as_str().expect("file id");
        let response = app
            .dispatch(
                Request::builder()
                    .uri(format!("/api/v1/spaces/{space_id}/files/{file_id}"))
                    .header(AUTHORIZATION, format!("Bearer {}", viewer.token))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_validates_input() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Team").await;

        let (status, body) = upload(&app, space_id, &owner, "font.woff2", "font/woff2", b"x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "file type not allowed");

        let (status, _) = upload(&app, space_id, &owner, "   ", "text/plain", b"x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = app
            .dispatch(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/spaces/{space_id}/files"))
                    .header(AUTHORIZATION, format!("Bearer {}", owner.token))
                    .body(Body::from("no name"))
                    .expect("build request"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, uploaded) = upload(&app, space_id, &owner, "blob", "", b"raw").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(uploaded["media_type"], "application/octet-stream");
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_are_rate_limited_per_actor() {
        let app = TestApp::new()
            .await
            .with_upload_limiter(Arc::new(UploadRateLimiter::new(UploadQuota {
                max_uploads: 2,
                window: Duration::from_secs(60 * 60),
            })));
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Team").await;

        for name in ["1.txt", "2.txt"] {
            let (status, _) = upload(&app, space_id, &owner, name, "text/plain", b"x").await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, body) = upload(&app, space_id, &owner, "3.txt", "text/plain", b"x").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "rate_limited");

        tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;
        let (status, _) = upload(&app, space_id, &owner, "4.txt", "text/plain", b"x").await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn own_files_only_limits_non_admins() {
        let app = TestApp::new().await;
        let admin = app.user("21CS001", "Asha").await;
        let alice = app.user("21CS002", "Alice").await;
        let bob = app.user("21CS003", "Bob").await;
        let space_id = app.space(&admin, "Team").await;
        app.join(space_id, &alice, Role::Member).await;
        app.join(space_id, &bob, Role::Member).await;

        let (_, alice_file) = upload(&app, space_id, &alice, "a.txt", "text/plain", b"a").await;
        upload(&app, space_id, &bob, "b.txt", "text/plain", b"b").await;
        restrict_to_own_files(&app, space_id).await;
        let alice_file = alice_file["id"].as_str().expect("file id").to_owned();
        let list_uri = format!("/api/v1/spaces/{space_id}/files");
        let file_uri = format!("{list_uri}/{alice_file}");

        let (_, bob_sees) = app.call("GET", &list_uri, Some(&bob), None).await;
        assert_eq!(bob_sees.as_array().map(Vec::len), Some(1));
        assert_eq!(bob_sees[0]["name"], "b.txt");
        let (_, admin_sees) = app.call("GET", &list_uri, Some(&admin), None).await;
        assert_eq!(admin_sees.as_array().map(Vec::len), Some(2));

        let (status, _) = app.call("GET", &file_uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app
            .call("PATCH", &file_uri, Some(&bob), Some(json!({ "name": "mine.txt" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.call("DELETE", &file_uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, renamed) = app
            .call("PATCH", &file_uri, Some(&alice), Some(json!({ "name": "notes.txt" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "notes.txt");

        let (status, _) = app.call("DELETE", &file_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn rename_and_delete_are_ledgered() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Team").await;
        let (_, uploaded) = upload(&app, space_id, &owner, "draft.txt", "text/plain", b"x").await;
        let file_uri = format!(
            "/api/v1/spaces/{space_id}/files/{}",
            uploaded["id"].as_str().expect("file id")
        );
        let activity_uri = format!("/api/v1/spaces/{space_id}/activity");

        app.call("PATCH", &file_uri, Some(&owner), Some(json!({ "name": "final.txt" })))
            .await;
        let (_, activity) = app.call("GET", &activity_uri, Some(&owner), None).await;
        assert_eq!(activity["items"][0]["action"], "rename");
        assert_eq!(activity["items"][0]["target"], "final.txt");
        assert_eq!(activity["items"][0]["metadata"], json!({ "from": "draft.txt" }));

        let (status, _) = app.call("DELETE", &file_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call("GET", &file_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, activity) = app.call("GET", &activity_uri, Some(&owner), None).await;
        assert_eq!(activity["items"][0]["action"], "delete");
        assert_eq!(activity["items"][0]["target"], "final.txt");
        assert_eq!(activity["items"][1]["action"], "rename");
        assert_eq!(activity["items"][2]["action"], "upload");
    }
}
