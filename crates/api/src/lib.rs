#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{extract::State, http::StatusCode, middleware, Router};
use spaceshare_auth::TokenValidator;
use spaceshare_core::protocol::SpaceEvent;
use spaceshare_core::ActivityAction;
use spaceshare_realtime::FanoutHub;
use spaceshare_storage::Storage;
use uuid::Uuid;

mod access;
mod activity;
mod auth;
pub mod blobs;
mod error;
mod files;
pub mod guard;
mod join;
pub mod ledger;
mod members;
mod realtime;
mod spaces;
pub mod upload_quota;
mod views;

#[cfg(test)]
mod test_support;

pub use blobs::{BlobDeletion, BlobStore, BlobStoreError, ObjectStoreBlobStore, StoredBlob};
pub use error::ApiError;
pub use guard::{GuardCheck, GuardDecision, GuardDenial, MembershipGuard};
pub use ledger::ActivityLedger;
pub use upload_quota::{UploadQuota, UploadRateLimiter};

/// How long a realtime connection may take to send its auth frame.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ApiState {
    storage: Arc<dyn Storage>,
    validator: Arc<dyn TokenValidator + Send + Sync>,
    hub: Arc<dyn FanoutHub>,
    blobs: Arc<dyn BlobStore>,
    upload_limiter: Arc<UploadRateLimiter>,
    auth_timeout: Duration,
}

impl ApiState {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        validator: Arc<dyn TokenValidator + Send + Sync>,
        hub: Arc<dyn FanoutHub>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            storage,
            validator,
            hub,
            blobs,
            upload_limiter: Arc::new(UploadRateLimiter::default()),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_upload_limiter(mut self, limiter: Arc<UploadRateLimiter>) -> Self {
        self.upload_limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    #[must_use]
    pub fn upload_limiter(&self) -> Arc<UploadRateLimiter> {
        Arc::clone(&self.upload_limiter)
    }

    #[must_use]
    pub fn hub(&self) -> Arc<dyn FanoutHub> {
        Arc::clone(&self.hub)
    }

    pub(crate) fn ledger(&self) -> ActivityLedger<'_> {
        ActivityLedger::new(self.storage.as_ref())
    }

    /// Appends to the ledger and, once the entry is stored, tells watchers to
    /// refetch the activity feed.
    pub(crate) async fn record_activity(
        &self,
        space_id: Uuid,
        actor_id: Uuid,
        action: ActivityAction,
        target: Option<String>,
        metadata: Option<serde_json::Value>,
    ) {
        let appended = self
            .ledger()
            .append(space_id, actor_id, action, target.clone(), metadata)
            .await;
        if appended.is_none() {
            return;
        }
        self.hub
            .publish(space_id, SpaceEvent::activity(action, target))
            .await;
    }
}

pub fn router(state: ApiState) -> Router {
    let bearer = middleware::from_fn_with_state(state.clone(), auth::require_bearer);

    let api = Router::new()
        .route("/spaces", get(spaces::list_spaces).post(spaces::create_space))
        .route(
            "/spaces/{space_id}",
            get(spaces::get_space)
                .patch(spaces::update_space)
                .delete(spaces::delete_space),
        )
        .route(
            "/spaces/{space_id}/members",
            get(members::list_members).post(members::add_member),
        )
        .route(
            "/spaces/{space_id}/members/{member_id}",
            axum::routing::patch(members::change_role).delete(members::remove_member),
        )
        .route(
            "/spaces/{space_id}/files",
            get(files::list_files)
                .post(files::upload_file)
                .layer(DefaultBodyLimit::max(files::UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/spaces/{space_id}/files/{file_id}",
            get(files::download_file)
                .patch(files::rename_file)
                .delete(files::delete_file),
        )
        .route("/spaces/{space_id}/activity", get(activity::list_activity))
        .route("/realtime/strategy", get(realtime::strategy))
        .route_layer(bearer.clone())
        .route(
            "/join",
            get(join::preview_invite).merge(post(join::redeem_invite).route_layer(bearer)),
        )
        .route("/realtime", get(realtime::websocket_upgrade));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> StatusCode {
    match state.storage.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{Request, StatusCode};
    use spaceshare_core::protocol::{ServerFrame, SpaceEvent};
    use spaceshare_core::ActivityAction;
    use spaceshare_realtime::broker::Subscriber;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::router;
    use crate::test_support::TestApp;

    struct RecordingSubscriber {
        user_id: Uuid,
        frames: Mutex<Vec<ServerFrame>>,
    }

    impl Subscriber for RecordingSubscriber {
        fn send(&self, payload: Arc<str>) -> bool {
            let frame = serde_json::from_str(&payload).expect("decode frame");
            self.frames.lock().expect("lock frames").push(frame);
            true
        }

        fn user_id(&self) -> Uuid {
            self.user_id
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn activity_event_follows_only_a_stored_entry() {
        let app = TestApp::new().await;
        let owner = app.user("21CS001", "Asha").await;
        let space_id = app.space(&owner, "Team").await;
        let missing_space = Uuid::new_v4();

        let watcher = Arc::new(RecordingSubscriber {
            user_id: owner.id,
            frames: Mutex::new(Vec::new()),
        });
        let connection = app.hub.connect(watcher.clone()).await.expect("connect");
        app.hub
            .subscribe(connection, space_id)
            .await
            .expect("subscribe");
        app.hub
            .subscribe(connection, missing_space)
            .await
            .expect("subscribe missing space");

        app.state
            .record_activity(missing_space, owner.id, ActivityAction::Upload, None, None)
            .await;
        assert!(watcher.frames.lock().expect("lock frames").is_empty());

        app.state
            .record_activity(
                space_id,
                owner.id,
                ActivityAction::Upload,
                Some("a.txt".to_owned()),
                None,
            )
            .await;
        assert_eq!(
            *watcher.frames.lock().expect("lock frames"),
            vec![ServerFrame::Event {
                space: space_id,
                event: SpaceEvent::activity(ActivityAction::Upload, Some("a.txt".to_owned())),
            }]
        );
    }

    #[tokio::test]
    async fn health_reports_store_status() {
        let app = TestApp::new().await;
        let response = router(app.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("dispatch request");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_require_bearer_token() {
        let app = TestApp::new().await;
        for uri in ["/api/v1/spaces", "/api/v1/realtime/strategy"] {
            let response = router(app.state.clone())
                .oneshot(
                    Request::builder()
                        .uri(uri)
                        .body(Body::empty())
                        .expect("build request"),
                )
                .await
                .expect("dispatch request");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }

        let response = router(app.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/spaces")
                    .header(AUTHORIZATION, "Bearer forged")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("dispatch request");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
