use std::str::FromStr;

use async_trait::async_trait;
use spaceshare_core::ActivityAction;
use uuid::Uuid;

use super::{database_error, is_foreign_key_violation, unix_micros_to_system_time, PostgresStorage};
use crate::{ActivityRecord, ActivityStorage, NewActivity, StorageError};

const ACTIVITY_COLUMNS: &str = r#"
    id,
    space_id,
    actor_id,
    action,
    target,
    metadata,
    (EXTRACT(EPOCH FROM created_at) * 1000000)::BIGINT AS created_at_us
"#;

#[async_trait]
impl ActivityStorage for PostgresStorage {
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityRecord, StorageError> {
        let sql = format!(
            r#"
            INSERT INTO activity (id, space_id, actor_id, action, target, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ACTIVITY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(entry.space_id)
            .bind(entry.actor_id)
            .bind(entry.action.as_str())
            .bind(entry.target.as_deref())
            .bind(entry.metadata.as_ref().map(sqlx::types::Json))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                if is_foreign_key_violation(&error) {
                    StorageError::SpaceNotFound
                } else {
                    database_error(error)
                }
            })?;
        ActivityRecord::try_from(row)
    }

    async fn list_activity(
        &self,
        space_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match after {
            None => {
                let sql = format!(
                    r#"
                    SELECT {ACTIVITY_COLUMNS}
                    FROM activity
                    WHERE space_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#
                );
                sqlx::query_as::<_, ActivityRow>(&sql)
                    .bind(space_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            Some(cursor) => {
                // An unknown cursor makes the subquery NULL and the page empty.
                let sql = format!(
                    r#"
                    SELECT {ACTIVITY_COLUMNS}
                    FROM activity
                    WHERE space_id = $1
                      AND (created_at, id) < (
                          SELECT created_at, id FROM activity WHERE id = $2 AND space_id = $1
                      )
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                );
                sqlx::query_as::<_, ActivityRow>(&sql)
                    .bind(space_id)
                    .bind(cursor)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(database_error)?;

        rows.into_iter().map(ActivityRecord::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    space_id: Uuid,
    actor_id: Uuid,
    action: String,
    target: Option<String>,
    metadata: Option<sqlx::types::Json<serde_json::Value>>,
    created_at_us: i64,
}

impl TryFrom<ActivityRow> for ActivityRecord {
    type Error = StorageError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            space_id: row.space_id,
            actor_id: row.actor_id,
            action: ActivityAction::from_str(&row.action)
                .map_err(|error| StorageError::CorruptRow(error.to_string()))?,
            target: row.target,
            metadata: row.metadata.map(|json| json.0),
            created_at: unix_micros_to_system_time(row.created_at_us)?,
        })
    }
}
