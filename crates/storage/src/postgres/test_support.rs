use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::PostgresStorage;
use crate::{FileRecord, NewActivity, NewFile, NewSpace, SpaceRecord, UserRecord};
use spaceshare_core::{ActivityAction, Role};

// Brings every storage trait into scope for `use super::super::test_support::*`.
#[allow(unused_imports)]
pub(super) use crate::{
    ActivityStorage, FileStorage, MembershipStorage, SpaceStorage, Storage, StorageError,
    UserDirectory,
};

pub(super) async fn test_storage() -> Option<PostgresStorage> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(value) => value,
        Err(_) => return None,
    };

    // Each test gets its own schema so tests can run in parallel.
    let schema = format!("test_{}", Uuid::new_v4().simple());
    let mut opts: sqlx::postgres::PgConnectOptions =
        database_url.parse().expect("parse DATABASE_URL");
    opts = opts.options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await
        .expect("connect test database");
    sqlx::query(&format!("CREATE SCHEMA \"{schema}\""))
        .execute(&pool)
        .await
        .expect("create test schema");

    crate::migrate_with_pool(&pool)
        .await
        .expect("apply migrations");
    Some(PostgresStorage::from_pool(pool))
}

pub(super) async fn create_user(storage: &PostgresStorage, account: &str) -> UserRecord {
    storage
        .create_user(account, &format!("User {account}"))
        .await
        .expect("create user")
}

pub(super) async fn create_space(
    storage: &PostgresStorage,
    owner_id: Uuid,
    name: &str,
) -> SpaceRecord {
    storage
        .create_space(&NewSpace {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            owner_id,
            invite_token: None,
            default_join_role: Role::Member,
            own_files_only: false,
        })
        .await
        .expect("create space")
}

pub(super) async fn create_file(
    storage: &PostgresStorage,
    space_id: Uuid,
    uploaded_by: Uuid,
    name: &str,
) -> FileRecord {
    let id = Uuid::new_v4();
    storage
        .create_file(&NewFile {
            id,
            space_id,
            name: name.to_owned(),
            media_type: "text/plain".to_owned(),
            size: 5,
            storage_id: format!("spaces/{space_id}/{id}"),
            uploaded_by: Some(uploaded_by),
        })
        .await
        .expect("create file")
}

pub(super) async fn append_activity(storage: &PostgresStorage, space_id: Uuid, actor_id: Uuid) {
    storage
        .append_activity(&NewActivity {
            space_id,
            actor_id,
            action: ActivityAction::SpaceCreate,
            target: None,
            metadata: None,
        })
        .await
        .expect("append activity");
}
