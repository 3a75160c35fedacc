#![forbid(unsafe_code)]

mod activity;
mod files;
mod membership;
mod spaces;
mod users;

#[cfg(test)]
mod test_support;

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use spaceshare_core::Role;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::StorageError;

#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|error| StorageError::Database(error.to_string()))?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Shared helpers used across multiple domain modules
// ---------------------------------------------------------------------------

/// Takes the per-space row lock that serializes membership mutations.
pub(crate) async fn lock_space_for_update(
    tx: &mut Transaction<'_, Postgres>,
    space_id: Uuid,
) -> Result<(), StorageError> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM spaces WHERE id = $1 FOR UPDATE")
        .bind(space_id)
        .fetch_one(tx.as_mut())
        .await
        .map_err(|error| match error {
            sqlx::Error::RowNotFound => StorageError::SpaceNotFound,
            _ => StorageError::Database(error.to_string()),
        })?;
    Ok(())
}

pub(crate) fn database_error(error: sqlx::Error) -> StorageError {
    StorageError::Database(error.to_string())
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23505")
    )
}

pub(crate) fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23503")
    )
}

pub(crate) fn parse_role(value: &str) -> Result<Role, StorageError> {
    Role::from_str(value).map_err(|error| StorageError::CorruptRow(error.to_string()))
}

pub(crate) fn size_to_i64(size: u64) -> Result<i64, StorageError> {
    i64::try_from(size).map_err(|_| StorageError::CorruptRow("file size out of range".to_owned()))
}

pub(crate) fn size_from_i64(size: i64) -> Result<u64, StorageError> {
    u64::try_from(size).map_err(|_| StorageError::CorruptRow("negative file size".to_owned()))
}

pub(crate) fn unix_micros_to_system_time(value: i64) -> Result<SystemTime, StorageError> {
    let micros = value.unsigned_abs();
    let duration = Duration::from_micros(micros);
    if value >= 0 {
        Ok(UNIX_EPOCH + duration)
    } else {
        UNIX_EPOCH
            .checked_sub(duration)
            .ok_or_else(|| StorageError::CorruptRow("timestamp out of range".to_owned()))
    }
}
