use std::collections::HashSet;

use spaceshare_core::protocol::{ActivityItem, ActivityPage};
use spaceshare_core::ActivityAction;
use spaceshare_storage::{ActivityRecord, NewActivity, Storage, StorageError};
use tracing::warn;
use uuid::Uuid;

use crate::views::{resolve_user, unix_millis};

/// Append-only audit trail of state-changing actions in a space.
pub struct ActivityLedger<'a> {
    storage: &'a dyn Storage,
}

impl<'a> ActivityLedger<'a> {
    #[must_use]
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Records an entry. A failed write is logged and reported as `None`;
    /// it never fails the action that produced it.
    pub async fn append(
        &self,
        space_id: Uuid,
        actor_id: Uuid,
        action: ActivityAction,
        target: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Option<ActivityRecord> {
        let entry = NewActivity {
            space_id,
            actor_id,
            action,
            target,
            metadata,
        };
        match self.storage.append_activity(&entry).await {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(%space_id, %actor_id, %action, error = %error, "failed to append activity");
                None
            }
        }
    }

    /// Newest-first page resuming strictly after `cursor`. Actors are resolved
    /// with one directory lookup per page.
    pub async fn page(
        &self,
        space_id: Uuid,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> Result<ActivityPage, StorageError> {
        let mut records = self
            .storage
            .list_activity(space_id, cursor, limit.saturating_add(1))
            .await?;
        let has_more = records.len() > limit;
        records.truncate(limit);

        let actor_ids: Vec<Uuid> = records
            .iter()
            .map(|record| record.actor_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let users = self.storage.get_users(&actor_ids).await?;

        let next_cursor = if has_more {
            records.last().map(|record| record.id)
        } else {
            None
        };
        let items = records
            .into_iter()
            .map(|record| ActivityItem {
                id: record.id,
                action: record.action,
                target: record.target,
                metadata: record.metadata,
                actor: resolve_user(&users, record.actor_id),
                created_at_ms: unix_millis(record.created_at),
            })
            .collect();

        Ok(ActivityPage { items, next_cursor })
    }
}
