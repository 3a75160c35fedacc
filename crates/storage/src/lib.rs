#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use spaceshare_core::{ActivityAction, Role};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("space not found")]
    SpaceNotFound,
    #[error("member not found")]
    MemberNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("invite not found")]
    InviteNotFound,
    #[error("membership already exists")]
    MembershipExists,
    #[error("user already exists")]
    UserExists,
    #[error("space must keep at least one admin")]
    LastAdmin,
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    #[error("storage unavailable")]
    Unavailable,
    #[error("database error: {0}")]
    Database(String),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub account: String,
    pub display_name: String,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceRecord {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// Generated lazily; `None` until the space is first viewed.
    pub invite_token: Option<String>,
    pub default_join_role: Role,
    pub own_files_only: bool,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSpace {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub invite_token: Option<String>,
    pub default_join_role: Role,
    pub own_files_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceUpdate {
    pub name: Option<String>,
    pub own_files_only: Option<bool>,
    pub default_join_role: Option<Role>,
}

impl SpaceUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.own_files_only.is_none() && self.default_join_role.is_none()
    }
}

/// A space as seen from one member's space list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceListing {
    pub space: SpaceRecord,
    pub role: Role,
    pub file_count: u64,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    pub id: Uuid,
    pub space_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub space_id: Uuid,
    pub name: String,
    pub media_type: String,
    pub size: u64,
    /// Opaque blob store key.
    pub storage_id: String,
    pub uploaded_by: Option<Uuid>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub id: Uuid,
    pub space_id: Uuid,
    pub name: String,
    pub media_type: String,
    pub size: u64,
    pub storage_id: String,
    pub uploaded_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub space_id: Uuid,
    pub actor_id: Uuid,
    pub action: ActivityAction,
    pub target: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub space_id: Uuid,
    pub actor_id: Uuid,
    pub action: ActivityAction,
    pub target: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Domain-specific storage traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SpaceStorage: Send + Sync {
    async fn ping(&self) -> Result<(), StorageError>;
    /// Inserts the space together with the owner's admin membership.
    async fn create_space(&self, space: &NewSpace) -> Result<SpaceRecord, StorageError>;
    async fn get_space(&self, space_id: Uuid) -> Result<SpaceRecord, StorageError>;
    async fn list_spaces_for_user(&self, user_id: Uuid) -> Result<Vec<SpaceListing>, StorageError>;
    async fn update_space(
        &self,
        space_id: Uuid,
        update: &SpaceUpdate,
    ) -> Result<SpaceRecord, StorageError>;
    /// Stores `candidate` only if the space has no invite token yet and
    /// returns whichever token is stored afterwards.
    async fn ensure_invite_token(
        &self,
        space_id: Uuid,
        candidate: &str,
    ) -> Result<String, StorageError>;
    async fn rotate_invite_token(&self, space_id: Uuid, token: &str) -> Result<(), StorageError>;
    async fn find_space_by_invite_token(&self, token: &str) -> Result<SpaceRecord, StorageError>;
    /// Deletes the space and everything it owns. Returns the file records
    /// that were removed so their blobs can be released.
    async fn delete_space(&self, space_id: Uuid) -> Result<Vec<FileRecord>, StorageError>;
}

#[async_trait]
pub trait MembershipStorage: Send + Sync {
    async fn get_membership(
        &self,
        space_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MembershipRecord>, StorageError>;
    async fn get_member(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<MembershipRecord, StorageError>;
    async fn list_members(&self, space_id: Uuid) -> Result<Vec<MembershipRecord>, StorageError>;
    async fn count_admins(&self, space_id: Uuid) -> Result<u64, StorageError>;
    async fn add_member(
        &self,
        space_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<MembershipRecord, StorageError>;
    /// Changes a member's role, re-checking the last-admin rule under the
    /// space lock. Fails with [`StorageError::LastAdmin`].
    async fn change_member_role(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
        role: Role,
    ) -> Result<MembershipRecord, StorageError>;
    /// Removes a member, re-checking the last-admin rule under the space lock.
    async fn remove_member(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<MembershipRecord, StorageError>;
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn create_file(&self, file: &NewFile) -> Result<FileRecord, StorageError>;
    async fn get_file(&self, space_id: Uuid, file_id: Uuid) -> Result<FileRecord, StorageError>;
    /// Most recently updated first. `uploaded_by` narrows to one uploader.
    async fn list_files(
        &self,
        space_id: Uuid,
        uploaded_by: Option<Uuid>,
    ) -> Result<Vec<FileRecord>, StorageError>;
    async fn rename_file(
        &self,
        space_id: Uuid,
        file_id: Uuid,
        name: &str,
    ) -> Result<FileRecord, StorageError>;
    async fn delete_file(&self, space_id: Uuid, file_id: Uuid) -> Result<FileRecord, StorageError>;
}

#[async_trait]
pub trait ActivityStorage: Send + Sync {
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityRecord, StorageError>;
    /// Newest first, resuming strictly after `after` when given. An `after`
    /// that does not name an entry of this space yields an empty page.
    async fn list_activity(
        &self,
        space_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, StorageError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create_user(
        &self,
        account: &str,
        display_name: &str,
    ) -> Result<UserRecord, StorageError>;
    async fn find_user_by_account(&self, account: &str) -> Result<UserRecord, StorageError>;
    /// Missing ids are simply absent from the result.
    async fn get_users(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserRecord>, StorageError>;
}

/// Unified supertrait for code that needs access to all storage domains.
pub trait Storage:
    SpaceStorage + MembershipStorage + FileStorage + ActivityStorage + UserDirectory
{
}

impl<T> Storage for T where
    T: SpaceStorage + MembershipStorage + FileStorage + ActivityStorage + UserDirectory
{
}

pub async fn migrate() -> Result<(), StorageError> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| StorageError::MissingDatabaseUrl)?;
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .map_err(|error| StorageError::Database(error.to_string()))?;
    migrate_with_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_with_pool(pool: &sqlx::PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| StorageError::Migration(error.to_string()))?;
    Ok(())
}
