//! Process-local storage backend used for development and tests.
//!
//! All state lives behind a single lock, so every mutation (including the
//! last-admin check) is serialized the same way the Postgres backend
//! serializes them with a space row lock.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use spaceshare_core::{retains_admin, Role};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    ActivityRecord, ActivityStorage, FileRecord, FileStorage, MembershipRecord, MembershipStorage,
    NewActivity, NewFile, NewSpace, SpaceListing, SpaceRecord, SpaceStorage, SpaceUpdate,
    StorageError, UserDirectory, UserRecord,
};

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    last_tick: Option<SystemTime>,
    users: HashMap<Uuid, UserRecord>,
    spaces: HashMap<Uuid, SpaceRecord>,
    memberships: Vec<MembershipRecord>,
    files: HashMap<Uuid, FileRecord>,
    // Append order is chronological order.
    activity: Vec<ActivityRecord>,
}

impl State {
    /// Wall clock time, nudged forward so consecutive writes never share a
    /// timestamp.
    fn tick(&mut self) -> SystemTime {
        let now = SystemTime::now();
        let next = match self.last_tick {
            Some(last) if now <= last => last + Duration::from_micros(1),
            _ => now,
        };
        self.last_tick = Some(next);
        next
    }

    fn space(&self, space_id: Uuid) -> Result<&SpaceRecord, StorageError> {
        self.spaces.get(&space_id).ok_or(StorageError::SpaceNotFound)
    }

    fn space_mut(&mut self, space_id: Uuid) -> Result<&mut SpaceRecord, StorageError> {
        self.spaces
            .get_mut(&space_id)
            .ok_or(StorageError::SpaceNotFound)
    }

    fn member_index(&self, space_id: Uuid, membership_id: Uuid) -> Result<usize, StorageError> {
        self.memberships
            .iter()
            .position(|member| member.space_id == space_id && member.id == membership_id)
            .ok_or(StorageError::MemberNotFound)
    }

    fn admin_count(&self, space_id: Uuid) -> u64 {
        self.memberships
            .iter()
            .filter(|member| member.space_id == space_id && member.role.is_admin())
            .count() as u64
    }

    fn file_mut(&mut self, space_id: Uuid, file_id: Uuid) -> Result<&mut FileRecord, StorageError> {
        self.files
            .get_mut(&file_id)
            .filter(|file| file.space_id == space_id)
            .ok_or(StorageError::FileNotFound)
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpaceStorage for MemoryStorage {
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn create_space(&self, space: &NewSpace) -> Result<SpaceRecord, StorageError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&space.owner_id) {
            return Err(StorageError::UserNotFound);
        }
        if state.spaces.contains_key(&space.id) {
            return Err(StorageError::Database("duplicate space id".to_owned()));
        }
        let now = state.tick();
        let record = SpaceRecord {
            id: space.id,
            name: space.name.clone(),
            owner_id: space.owner_id,
            invite_token: space.invite_token.clone(),
            default_join_role: space.default_join_role,
            own_files_only: space.own_files_only,
            created_at: now,
            updated_at: now,
        };
        state.spaces.insert(record.id, record.clone());
        state.memberships.push(MembershipRecord {
            id: Uuid::new_v4(),
            space_id: space.id,
            user_id: space.owner_id,
            role: Role::Admin,
            created_at: now,
        });
        Ok(record)
    }

    async fn get_space(&self, space_id: Uuid) -> Result<SpaceRecord, StorageError> {
        self.state.read().await.space(space_id).cloned()
    }

    async fn list_spaces_for_user(&self, user_id: Uuid) -> Result<Vec<SpaceListing>, StorageError> {
        let state = self.state.read().await;
        let mut listings: Vec<SpaceListing> = state
            .memberships
            .iter()
            .filter(|member| member.user_id == user_id)
            .filter_map(|member| {
                let space = state.spaces.get(&member.space_id)?;
                Some(SpaceListing {
                    space: space.clone(),
                    role: member.role,
                    file_count: state
                        .files
                        .values()
                        .filter(|file| file.space_id == space.id)
                        .count() as u64,
                    member_count: state
                        .memberships
                        .iter()
                        .filter(|other| other.space_id == space.id)
                        .count() as u64,
                })
            })
            .collect();
        listings.sort_by(|a, b| {
            b.space
                .updated_at
                .cmp(&a.space.updated_at)
                .then_with(|| b.space.id.cmp(&a.space.id))
        });
        Ok(listings)
    }

    async fn update_space(
        &self,
        space_id: Uuid,
        update: &SpaceUpdate,
    ) -> Result<SpaceRecord, StorageError> {
        let mut state = self.state.write().await;
        state.space(space_id)?;
        let now = state.tick();
        let space = state.space_mut(space_id)?;
        if let Some(name) = &update.name {
            space.name = name.clone();
        }
        if let Some(own_files_only) = update.own_files_only {
            space.own_files_only = own_files_only;
        }
        if let Some(role) = update.default_join_role {
            space.default_join_role = role;
        }
        space.updated_at = now;
        Ok(space.clone())
    }

    async fn ensure_invite_token(
        &self,
        space_id: Uuid,
        candidate: &str,
    ) -> Result<String, StorageError> {
        let mut state = self.state.write().await;
        let space = state.space_mut(space_id)?;
        Ok(space
            .invite_token
            .get_or_insert_with(|| candidate.to_owned())
            .clone())
    }

    async fn rotate_invite_token(&self, space_id: Uuid, token: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.space(space_id)?;
        let taken = state
            .spaces
            .values()
            .any(|space| space.id != space_id && space.invite_token.as_deref() == Some(token));
        if taken {
            return Err(StorageError::Database("invite token collision".to_owned()));
        }
        let now = state.tick();
        let space = state.space_mut(space_id)?;
        space.invite_token = Some(token.to_owned());
        space.updated_at = now;
        Ok(())
    }

    async fn find_space_by_invite_token(&self, token: &str) -> Result<SpaceRecord, StorageError> {
        self.state
            .read()
            .await
            .spaces
            .values()
            .find(|space| space.invite_token.as_deref() == Some(token))
            .cloned()
            .ok_or(StorageError::InviteNotFound)
    }

    async fn delete_space(&self, space_id: Uuid) -> Result<Vec<FileRecord>, StorageError> {
        let mut state = self.state.write().await;
        state
            .spaces
            .remove(&space_id)
            .ok_or(StorageError::SpaceNotFound)?;
        state.memberships.retain(|member| member.space_id != space_id);
        state.activity.retain(|entry| entry.space_id != space_id);
        let file_ids: Vec<Uuid> = state
            .files
            .values()
            .filter(|file| file.space_id == space_id)
            .map(|file| file.id)
            .collect();
        Ok(file_ids
            .into_iter()
            .filter_map(|id| state.files.remove(&id))
            .collect())
    }
}

#[async_trait]
impl MembershipStorage for MemoryStorage {
    async fn get_membership(
        &self,
        space_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MembershipRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .iter()
            .find(|member| member.space_id == space_id && member.user_id == user_id)
            .cloned())
    }

    async fn get_member(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<MembershipRecord, StorageError> {
        let state = self.state.read().await;
        let index = state.member_index(space_id, membership_id)?;
        Ok(state.memberships[index].clone())
    }

    async fn list_members(&self, space_id: Uuid) -> Result<Vec<MembershipRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .iter()
            .filter(|member| member.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn count_admins(&self, space_id: Uuid) -> Result<u64, StorageError> {
        Ok(self.state.read().await.admin_count(space_id))
    }

    async fn add_member(
        &self,
        space_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<MembershipRecord, StorageError> {
        let mut state = self.state.write().await;
        state.space(space_id)?;
        if !state.users.contains_key(&user_id) {
            return Err(StorageError::UserNotFound);
        }
        if state
            .memberships
            .iter()
            .any(|member| member.space_id == space_id && member.user_id == user_id)
        {
            return Err(StorageError::MembershipExists);
        }
        let record = MembershipRecord {
            id: Uuid::new_v4(),
            space_id,
            user_id,
            role,
            created_at: state.tick(),
        };
        state.memberships.push(record.clone());
        Ok(record)
    }

    async fn change_member_role(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
        role: Role,
    ) -> Result<MembershipRecord, StorageError> {
        let mut state = self.state.write().await;
        state.space(space_id)?;
        let index = state.member_index(space_id, membership_id)?;
        let current = state.memberships[index].role;
        if !retains_admin(current, Some(role), state.admin_count(space_id)) {
            return Err(StorageError::LastAdmin);
        }
        state.memberships[index].role = role;
        Ok(state.memberships[index].clone())
    }

    async fn remove_member(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<MembershipRecord, StorageError> {
        let mut state = self.state.write().await;
        state.space(space_id)?;
        let index = state.member_index(space_id, membership_id)?;
        let current = state.memberships[index].role;
        if !retains_admin(current, None, state.admin_count(space_id)) {
            return Err(StorageError::LastAdmin);
        }
        Ok(state.memberships.remove(index))
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn create_file(&self, file: &NewFile) -> Result<FileRecord, StorageError> {
        let mut state = self.state.write().await;
        state.space(file.space_id)?;
        let now = state.tick();
        let record = FileRecord {
            id: file.id,
            space_id: file.space_id,
            name: file.name.clone(),
            media_type: file.media_type.clone(),
            size: file.size,
            storage_id: file.storage_id.clone(),
            uploaded_by: file.uploaded_by,
            created_at: now,
            updated_at: now,
        };
        state.files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_file(&self, space_id: Uuid, file_id: Uuid) -> Result<FileRecord, StorageError> {
        self.state
            .read()
            .await
            .files
            .get(&file_id)
            .filter(|file| file.space_id == space_id)
            .cloned()
            .ok_or(StorageError::FileNotFound)
    }

    async fn list_files(
        &self,
        space_id: Uuid,
        uploaded_by: Option<Uuid>,
    ) -> Result<Vec<FileRecord>, StorageError> {
        let state = self.state.read().await;
        let mut files: Vec<FileRecord> = state
            .files
            .values()
            .filter(|file| file.space_id == space_id)
            .filter(|file| uploaded_by.is_none() || file.uploaded_by == uploaded_by)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(files)
    }

    async fn rename_file(
        &self,
        space_id: Uuid,
        file_id: Uuid,
        name: &str,
    ) -> Result<FileRecord, StorageError> {
        let mut state = self.state.write().await;
        state.file_mut(space_id, file_id)?;
        let now = state.tick();
        let file = state.file_mut(space_id, file_id)?;
        file.name = name.to_owned();
        file.updated_at = now;
        Ok(file.clone())
    }

    async fn delete_file(&self, space_id: Uuid, file_id: Uuid) -> Result<FileRecord, StorageError> {
        let mut state = self.state.write().await;
        state.file_mut(space_id, file_id)?;
        state.files.remove(&file_id).ok_or(StorageError::FileNotFound)
    }
}

#[async_trait]
impl ActivityStorage for MemoryStorage {
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityRecord, StorageError> {
        let mut state = self.state.write().await;
        state.space(entry.space_id)?;
        let record = ActivityRecord {
            id: Uuid::new_v4(),
            space_id: entry.space_id,
            actor_id: entry.actor_id,
            action: entry.action,
            target: entry.target.clone(),
            metadata: entry.metadata.clone(),
            created_at: state.tick(),
        };
        state.activity.push(record.clone());
        Ok(record)
    }

    async fn list_activity(
        &self,
        space_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, StorageError> {
        let state = self.state.read().await;
        let mut newest_first = state
            .activity
            .iter()
            .rev()
            .filter(|entry| entry.space_id == space_id);

        if let Some(cursor) = after {
            if !newest_first.any(|entry| entry.id == cursor) {
                return Ok(Vec::new());
            }
        }
        Ok(newest_first.take(limit).cloned().collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStorage {
    async fn create_user(
        &self,
        account: &str,
        display_name: &str,
    ) -> Result<UserRecord, StorageError> {
        let mut state = self.state.write().await;
        if state.users.values().any(|user| user.account == account) {
            return Err(StorageError::UserExists);
        }
        let record = UserRecord {
            id: Uuid::new_v4(),
            account: account.to_owned(),
            display_name: display_name.to_owned(),
            created_at: state.tick(),
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user_by_account(&self, account: &str) -> Result<UserRecord, StorageError> {
        self.state
            .read()
            .await
            .users
            .values()
            .find(|user| user.account == account)
            .cloned()
            .ok_or(StorageError::UserNotFound)
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, UserRecord>, StorageError> {
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).map(|user| (*id, user.clone())))
            .collect())
    }
}
