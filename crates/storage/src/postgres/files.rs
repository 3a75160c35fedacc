use async_trait::async_trait;
use uuid::Uuid;

use super::{
    database_error, is_foreign_key_violation, size_from_i64, size_to_i64,
    unix_micros_to_system_time, PostgresStorage,
};
use crate::{FileRecord, FileStorage, NewFile, StorageError};

pub(crate) const FILE_COLUMNS: &str = r#"
    id,
    space_id,
    name,
    media_type,
    size,
    storage_id,
    uploaded_by,
    (EXTRACT(EPOCH FROM created_at) * 1000000)::BIGINT AS created_at_us,
    (EXTRACT(EPOCH FROM updated_at) * 1000000)::BIGINT AS updated_at_us
"#;

#[async_trait]
impl FileStorage for PostgresStorage {
    async fn create_file(&self, file: &NewFile) -> Result<FileRecord, StorageError> {
        let sql = format!(
            r#"
            INSERT INTO files (id, space_id, name, media_type, size, storage_id, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {FILE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(file.id)
            .bind(file.space_id)
            .bind(&file.name)
            .bind(&file.media_type)
            .bind(size_to_i64(file.size)?)
            .bind(&file.storage_id)
            .bind(file.uploaded_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                if is_foreign_key_violation(&error) {
                    StorageError::SpaceNotFound
                } else {
                    database_error(error)
                }
            })?;
        FileRecord::try_from(row)
    }

    async fn get_file(&self, space_id: Uuid, file_id: Uuid) -> Result<FileRecord, StorageError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE space_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(space_id)
            .bind(file_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::FileNotFound,
                _ => database_error(error),
            })?;
        FileRecord::try_from(row)
    }

    async fn list_files(
        &self,
        space_id: Uuid,
        uploaded_by: Option<Uuid>,
    ) -> Result<Vec<FileRecord>, StorageError> {
        let sql = format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM files
            WHERE space_id = $1 AND ($2::UUID IS NULL OR uploaded_by = $2)
            ORDER BY updated_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, FileRow>(&sql)
            .bind(space_id)
            .bind(uploaded_by)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn rename_file(
        &self,
        space_id: Uuid,
        file_id: Uuid,
        name: &str,
    ) -> Result<FileRecord, StorageError> {
        let sql = format!(
            r#"
            UPDATE files
            SET name = $3, updated_at = clock_timestamp()
            WHERE space_id = $1 AND id = $2
            RETURNING {FILE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(space_id)
            .bind(file_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::FileNotFound,
                _ => database_error(error),
            })?;
        FileRecord::try_from(row)
    }

    async fn delete_file(&self, space_id: Uuid, file_id: Uuid) -> Result<FileRecord, StorageError> {
        let sql = format!(
            "DELETE FROM files WHERE space_id = $1 AND id = $2 RETURNING {FILE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(space_id)
            .bind(file_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::RowNotFound => StorageError::FileNotFound,
                _ => database_error(error),
            })?;
        FileRecord::try_from(row)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FileRow {
    id: Uuid,
    space_id: Uuid,
    name: String,
    media_type: String,
    size: i64,
    storage_id: String,
    uploaded_by: Option<Uuid>,
    created_at_us: i64,
    updated_at_us: i64,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = StorageError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            space_id: row.space_id,
            name: row.name,
            media_type: row.media_type,
            size: size_from_i64(row.size)?,
            storage_id: row.storage_id,
            uploaded_by: row.uploaded_by,
            created_at: unix_micros_to_system_time(row.created_at_us)?,
            updated_at: unix_micros_to_system_time(row.updated_at_us)?,
        })
    }
}
