use async_trait::async_trait;
use uuid::Uuid;

use super::files::{FileRow, FILE_COLUMNS};
use super::{
    database_error, is_foreign_key_violation, is_unique_violation, parse_role,
    unix_micros_to_system_time, PostgresStorage,
};
use crate::{
    FileRecord, NewSpace, SpaceListing, SpaceRecord, SpaceStorage, SpaceUpdate, StorageError,
};

pub(crate) const SPACE_COLUMNS: &str = r#"
    id,
    name,
    owner_id,
    invite_token,
    default_join_role,
    own_files_only,
    (EXTRACT(EPOCH FROM created_at) * 1000000)::BIGINT AS created_at_us,
    (EXTRACT(EPOCH FROM updated_at) * 1000000)::BIGINT AS updated_at_us
"#;

#[async_trait]
impl SpaceStorage for PostgresStorage {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    async fn create_space(&self, space: &NewSpace) -> Result<SpaceRecord, StorageError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let sql = format!(
            r#"
            INSERT INTO spaces (id, name, owner_id, invite_token, default_join_role, own_files_only)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SPACE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SpaceRow>(&sql)
            .bind(space.id)
            .bind(&space.name)
            .bind(space.owner_id)
            .bind(space.invite_token.as_deref())
            .bind(space.default_join_role.as_str())
            .bind(space.own_files_only)
            .fetch_one(tx.as_mut())
            .await
            .map_err(|error| {
                if is_foreign_key_violation(&error) {
                    StorageError::UserNotFound
                } else {
                    database_error(error)
                }
            })?;

        sqlx::query(
            "INSERT INTO memberships (id, space_id, user_id, role) VALUES ($1, $2, $3, 'admin')",
        )
        .bind(Uuid::new_v4())
        .bind(space.id)
        .bind(space.owner_id)
        .execute(tx.as_mut())
        .await
        .map_err(database_error)?;

        tx.commit().await.map_err(database_error)?;
        SpaceRecord::try_from(row)
    }

    async fn get_space(&self, space_id: Uuid) -> Result<SpaceRecord, StorageError> {
        let sql = format!("SELECT {SPACE_COLUMNS} FROM spaces WHERE id = $1");
        let row = sqlx::query_as::<_, SpaceRow>(&sql)
            .bind(space_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::SpaceNotFound,
                _ => database_error(error),
            })?;
        SpaceRecord::try_from(row)
    }

    async fn list_spaces_for_user(&self, user_id: Uuid) -> Result<Vec<SpaceListing>, StorageError> {
        let rows = sqlx::query_as::<_, SpaceListingRow>(
            r#"
            SELECT
                s.id,
                s.name,
                s.owner_id,
                s.invite_token,
                s.default_join_role,
                s.own_files_only,
                (EXTRACT(EPOCH FROM s.created_at) * 1000000)::BIGINT AS created_at_us,
                (EXTRACT(EPOCH FROM s.updated_at) * 1000000)::BIGINT AS updated_at_us,
                m.role AS member_role,
                (SELECT COUNT(*) FROM files f WHERE f.space_id = s.id) AS file_count,
                (SELECT COUNT(*) FROM memberships mm WHERE mm.space_id = s.id) AS member_count
            FROM spaces s
            JOIN memberships m ON m.space_id = s.id AND m.user_id = $1
            ORDER BY s.updated_at DESC, s.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.into_iter().map(SpaceListing::try_from).collect()
    }

    async fn update_space(
        &self,
        space_id: Uuid,
        update: &SpaceUpdate,
    ) -> Result<SpaceRecord, StorageError> {
        let sql = format!(
            r#"
            UPDATE spaces
            SET name = COALESCE($2, name),
                own_files_only = COALESCE($3, own_files_only),
                default_join_role = COALESCE($4, default_join_role),
                updated_at = clock_timestamp()
            WHERE id = $1
            RETURNING {SPACE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SpaceRow>(&sql)
            .bind(space_id)
            .bind(update.name.as_deref())
            .bind(update.own_files_only)
            .bind(update.default_join_role.map(|role| role.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::SpaceNotFound,
                _ => database_error(error),
            })?;
        SpaceRecord::try_from(row)
    }

    async fn ensure_invite_token(
        &self,
        space_id: Uuid,
        candidate: &str,
    ) -> Result<String, StorageError> {
        let token: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE spaces
            SET invite_token = COALESCE(invite_token, $2)
            WHERE id = $1
            RETURNING invite_token
            "#,
        )
        .bind(space_id)
        .bind(candidate)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| match error {
            sqlx::Error::RowNotFound => StorageError::SpaceNotFound,
            _ => database_error(error),
        })?;
        token.ok_or_else(|| StorageError::CorruptRow("invite token not stored".to_owned()))
    }

    async fn rotate_invite_token(&self, space_id: Uuid, token: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE spaces SET invite_token = $2, updated_at = clock_timestamp() WHERE id = $1",
        )
        .bind(space_id)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                StorageError::Database("invite token collision".to_owned())
            } else {
                database_error(error)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(StorageError::SpaceNotFound);
        }
        Ok(())
    }

    async fn find_space_by_invite_token(&self, token: &str) -> Result<SpaceRecord, StorageError> {
        let sql = format!("SELECT {SPACE_COLUMNS} FROM spaces WHERE invite_token = $1");
        let row = sqlx::query_as::<_, SpaceRow>(&sql)
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::InviteNotFound,
                _ => database_error(error),
            })?;
        SpaceRecord::try_from(row)
    }

    async fn delete_space(&self, space_id: Uuid) -> Result<Vec<FileRecord>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        super::lock_space_for_update(&mut tx, space_id).await?;

        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE space_id = $1");
        let files = sqlx::query_as::<_, FileRow>(&sql)
            .bind(space_id)
            .fetch_all(tx.as_mut())
            .await
            .map_err(database_error)?;

        sqlx::query("DELETE FROM spaces WHERE id = $1")
            .bind(space_id)
            .execute(tx.as_mut())
            .await
            .map_err(database_error)?;
        tx.commit().await.map_err(database_error)?;

        files.into_iter().map(FileRecord::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SpaceRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_token: Option<String>,
    pub default_join_role: String,
    pub own_files_only: bool,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

impl TryFrom<SpaceRow> for SpaceRecord {
    type Error = StorageError;

    fn try_from(row: SpaceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            invite_token: row.invite_token,
            default_join_role: parse_role(&row.default_join_role)?,
            own_files_only: row.own_files_only,
            created_at: unix_micros_to_system_time(row.created_at_us)?,
            updated_at: unix_micros_to_system_time(row.updated_at_us)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SpaceListingRow {
    #[sqlx(flatten)]
    space: SpaceRow,
    member_role: String,
    file_count: i64,
    member_count: i64,
}

impl TryFrom<SpaceListingRow> for SpaceListing {
    type Error = StorageError;

    fn try_from(row: SpaceListingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: parse_role(&row.member_role)?,
            file_count: row.file_count.max(0) as u64,
            member_count: row.member_count.max(0) as u64,
            space: SpaceRecord::try_from(row.space)?,
        })
    }
}
