use async_trait::async_trait;
use spaceshare_core::{retains_admin, Role};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{
    database_error, is_foreign_key_violation, is_unique_violation, lock_space_for_update,
    parse_role, unix_micros_to_system_time, PostgresStorage,
};
use crate::{MembershipRecord, MembershipStorage, StorageError};

const MEMBERSHIP_COLUMNS: &str = r#"
    id,
    space_id,
    user_id,
    role,
    (EXTRACT(EPOCH FROM created_at) * 1000000)::BIGINT AS created_at_us
"#;

#[async_trait]
impl MembershipStorage for PostgresStorage {
    async fn get_membership(
        &self,
        space_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MembershipRecord>, StorageError> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE space_id = $1 AND user_id = $2"
        );
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(space_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;
        row.map(MembershipRecord::try_from).transpose()
    }

    async fn get_member(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<MembershipRecord, StorageError> {
        let sql =
            format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE space_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(space_id)
            .bind(membership_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::MemberNotFound,
                _ => database_error(error),
            })?;
        MembershipRecord::try_from(row)
    }

    async fn list_members(&self, space_id: Uuid) -> Result<Vec<MembershipRecord>, StorageError> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE space_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(space_id)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        rows.into_iter().map(MembershipRecord::try_from).collect()
    }

    async fn count_admins(&self, space_id: Uuid) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE space_id = $1 AND role = 'admin'",
        )
        .bind(space_id)
        .fetch_one(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(count.max(0) as u64)
    }

    async fn add_member(
        &self,
        space_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<MembershipRecord, StorageError> {
        let sql = format!(
            r#"
            INSERT INTO memberships (id, space_id, user_id, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(space_id)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                if is_unique_violation(&error) {
                    StorageError::MembershipExists
                } else if is_foreign_key_violation(&error) {
                    StorageError::SpaceNotFound
                } else {
                    database_error(error)
                }
            })?;
        MembershipRecord::try_from(row)
    }

    async fn change_member_role(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
        role: Role,
    ) -> Result<MembershipRecord, StorageError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        lock_space_for_update(&mut tx, space_id).await?;

        let current = locked_member(&mut tx, space_id, membership_id).await?;
        if !retains_admin(current.role, Some(role), admin_count(&mut tx, space_id).await?) {
            return Err(StorageError::LastAdmin);
        }

        let sql = format!(
            "UPDATE memberships SET role = $3 WHERE space_id = $1 AND id = $2 RETURNING {MEMBERSHIP_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(space_id)
            .bind(membership_id)
            .bind(role.as_str())
            .fetch_one(tx.as_mut())
            .await
            .map_err(database_error)?;
        tx.commit().await.map_err(database_error)?;
        MembershipRecord::try_from(row)
    }

    async fn remove_member(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<MembershipRecord, StorageError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        lock_space_for_update(&mut tx, space_id).await?;

        let current = locked_member(&mut tx, space_id, membership_id).await?;
        if !retains_admin(current.role, None, admin_count(&mut tx, space_id).await?) {
            return Err(StorageError::LastAdmin);
        }

        sqlx::query("DELETE FROM memberships WHERE space_id = $1 AND id = $2")
            .bind(space_id)
            .bind(membership_id)
            .execute(tx.as_mut())
            .await
            .map_err(database_error)?;
        tx.commit().await.map_err(database_error)?;
        Ok(current)
    }
}

async fn locked_member(
    tx: &mut Transaction<'_, Postgres>,
    space_id: Uuid,
    membership_id: Uuid,
) -> Result<MembershipRecord, StorageError> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE space_id = $1 AND id = $2 FOR UPDATE"
    );
    let row = sqlx::query_as::<_, MembershipRow>(&sql)
        .bind(space_id)
        .bind(membership_id)
        .fetch_one(tx.as_mut())
        .await
        .map_err(|error| match error {
            sqlx::Error::RowNotFound => StorageError::MemberNotFound,
            _ => database_error(error),
        })?;
    MembershipRecord::try_from(row)
}

async fn admin_count(
    tx: &mut Transaction<'_, Postgres>,
    space_id: Uuid,
) -> Result<u64, StorageError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM memberships WHERE space_id = $1 AND role = 'admin'",
    )
    .bind(space_id)
    .fetch_one(tx.as_mut())
    .await
    .map_err(database_error)?;
    Ok(count.max(0) as u64)
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    id: Uuid,
    space_id: Uuid,
    user_id: Uuid,
    role: String,
    created_at_us: i64,
}

impl TryFrom<MembershipRow> for MembershipRecord {
    type Error = StorageError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            space_id: row.space_id,
            user_id: row.user_id,
            role: parse_role(&row.role)?,
            created_at: unix_micros_to_system_time(row.created_at_us)?,
        })
    }
}
