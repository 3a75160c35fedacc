use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use super::{database_error, is_unique_violation, unix_micros_to_system_time, PostgresStorage};
use crate::{StorageError, UserDirectory, UserRecord};

const USER_COLUMNS: &str = r#"
    id,
    account,
    display_name,
    (EXTRACT(EPOCH FROM created_at) * 1000000)::BIGINT AS created_at_us
"#;

#[async_trait]
impl UserDirectory for PostgresStorage {
    async fn create_user(
        &self,
        account: &str,
        display_name: &str,
    ) -> Result<UserRecord, StorageError> {
        let sql = format!(
            "INSERT INTO users (id, account, display_name) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(account)
            .bind(display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                if is_unique_violation(&error) {
                    StorageError::UserExists
                } else {
                    database_error(error)
                }
            })?;
        UserRecord::try_from(row)
    }

    async fn find_user_by_account(&self, account: &str) -> Result<UserRecord, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE account = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(account)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::UserNotFound,
                _ => database_error(error),
            })?;
        UserRecord::try_from(row)
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserRecord>, StorageError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        rows.into_iter()
            .map(|row| UserRecord::try_from(row).map(|user| (user.id, user)))
            .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    account: String,
    display_name: String,
    created_at_us: i64,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            account: row.account,
            display_name: row.display_name,
            created_at: unix_micros_to_system_time(row.created_at_us)?,
        })
    }
}
