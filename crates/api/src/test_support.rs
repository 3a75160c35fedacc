use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use spaceshare_auth::{AuthContext, AuthError, TokenValidator};
use spaceshare_core::Role;
use spaceshare_realtime::broker::BrokerConfig;
use spaceshare_realtime::{FanoutHub, PushHub};
use spaceshare_storage::{
    MemoryStorage, MembershipStorage, NewSpace, SpaceStorage, UserDirectory,
};
use tower::ServiceExt;
use uuid::Uuid;

use crate::{router, ApiState, ObjectStoreBlobStore, UploadRateLimiter};

#[derive(Default)]
pub(crate) struct StubValidator {
    tokens: Mutex<HashMap<String, AuthContext>>,
}

impl StubValidator {
    fn issue(&self, auth: AuthContext) -> String {
        let token = format!("token-{}", auth.account);
        self.tokens
            .lock()
            .expect("token lock")
            .insert(token.clone(), auth);
        token
    }
}

#[async_trait]
impl TokenValidator for StubValidator {
    async fn validate_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        self.tokens
            .lock()
            .expect("token lock")
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TestUser {
    pub id: Uuid,
    pub token: String,
}

pub(crate) struct TestApp {
    pub state: ApiState,
    pub storage: Arc<MemoryStorage>,
    pub hub: Arc<dyn FanoutHub>,
    validator: Arc<StubValidator>,
}

impl TestApp {
    pub(crate) async fn new() -> Self {
        Self::with_hub(Arc::new(PushHub::new(
            BrokerConfig::default(),
            Duration::from_secs(50),
        )))
        .await
    }

    pub(crate) async fn with_hub(hub: Arc<dyn FanoutHub>) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let validator = Arc::new(StubValidator::default());
        let state = ApiState::new(
            storage.clone(),
            validator.clone(),
            Arc::clone(&hub),
            Arc::new(ObjectStoreBlobStore::in_memory()),
        );
        Self {
            state,
            storage,
            hub,
            validator,
        }
    }

    pub(crate) fn with_upload_limiter(mut self, limiter: Arc<UploadRateLimiter>) -> Self {
        self.state = self.state.with_upload_limiter(limiter);
        self
    }

    pub(crate) fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.state = self.state.with_auth_timeout(auth_timeout);
        self
    }

    pub(crate) async fn user(&self, account: &str, name: &str) -> TestUser {
        let user = self
            .storage
            .create_user(account, name)
            .await
            .expect("create user");
        let token = self.validator.issue(AuthContext {
            user_id: user.id,
            account: user.account,
            name: user.display_name,
        });
        TestUser { id: user.id, token }
    }

    /// Creates a space directly in the store, bypassing the ledger.
    pub(crate) async fn space(&self, owner: &TestUser, name: &str) -> Uuid {
        self.storage
            .create_space(&NewSpace {
                id: Uuid::new_v4(),
                name: name.to_owned(),
                owner_id: owner.id,
                invite_token: None,
                default_join_role: Role::Member,
                own_files_only: false,
            })
            .await
            .expect("create space")
            .id
    }

    pub(crate) async fn join(&self, space_id: Uuid, user: &TestUser, role: Role) -> Uuid {
        self.storage
            .add_member(space_id, user.id, role)
            .await
            .expect("add member")
            .id
    }

    pub(crate) async fn membership_id(&self, space_id: Uuid, user: &TestUser) -> Uuid {
        self.storage
            .get_membership(space_id, user.id)
            .await
            .expect("load membership")
            .expect("membership exists")
            .id
    }

    pub(crate) async fn dispatch(&self, request: Request<Body>) -> Response {
        router(self.state.clone())
            .oneshot(request)
            .await
            .expect("dispatch request")
    }

    /// Sends a JSON request and decodes the JSON response body.
    pub(crate) async fn call(
        &self,
        method: &str,
        uri: &str,
        user: Option<&TestUser>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", user.token));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self.dispatch(request).await;
        let status = response.status();
        (status, read_json(response).await)
    }
}

pub(crate) async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(&bytes).expect("decode json body")
}
