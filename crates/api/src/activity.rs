use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use spaceshare_auth::{Action, AuthContext};
use spaceshare_core::protocol::ActivityPage;
use spaceshare_core::validation::{page_limit, ValidationError};
use uuid::Uuid;

use crate::access::{parse_id, SpaceAccess};
use crate::{ApiError, ApiState};

/// Raw query parameters; parsed by hand so bad input maps to our error codes.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ActivityQuery {
    cursor: Option<String>,
    limit: Option<String>,
}

impl ActivityQuery {
    fn cursor(&self) -> Result<Option<Uuid>, ValidationError> {
        match self.cursor.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Uuid::parse_str(raw)
                .map(Some)
                .map_err(|_| ValidationError::Cursor),
        }
    }

    fn limit(&self) -> Result<usize, ValidationError> {
        let requested = match self.limit.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse().map_err(|_| ValidationError::PageLimit)?),
        };
        page_limit(requested)
    }
}

pub(crate) async fn list_activity(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthContext>,
    Path(space_id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityPage>, ApiError> {
    let space_id = parse_id(&space_id, "space ID")?;
    let access = SpaceAccess::load(&state, space_id, auth.user_id).await?;
    access.require(Action::View)?;

    let cursor = query.cursor()?;
    let limit = query.limit()?;
    let page = state.ledger().page(space_id, cursor, limit).await?;
    Ok(Json(page))
}
