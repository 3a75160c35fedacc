use spaceshare_core::retains_admin;
use spaceshare_storage::{MembershipRecord, MembershipStorage, StorageError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDenial {
    LastAdmin,
}

impl GuardDenial {
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::LastAdmin => "last admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Denied(GuardDenial),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardCheck {
    pub target: MembershipRecord,
    pub decision: GuardDecision,
}

/// Keeps every space with at least one admin.
///
/// This is the early, user-facing check. The store repeats it inside its
/// per-space critical section when the write happens, so a race between two
/// removals is still caught as [`StorageError::LastAdmin`].
pub struct MembershipGuard<'a> {
    memberships: &'a dyn MembershipStorage,
}

impl<'a> MembershipGuard<'a> {
    #[must_use]
    pub fn new(memberships: &'a dyn MembershipStorage) -> Self {
        Self { memberships }
    }

    pub async fn can_remove_or_demote(
        &self,
        space_id: Uuid,
        membership_id: Uuid,
    ) -> Result<GuardCheck, StorageError> {
        let target = self.memberships.get_member(space_id, membership_id).await?;
        if !target.role.is_admin() {
            return Ok(GuardCheck {
                target,
                decision: GuardDecision::Allowed,
            });
        }

        let admins = self.memberships.count_admins(space_id).await?;
        let decision = if retains_admin(target.role, None, admins) {
            GuardDecision::Allowed
        } else {
            GuardDecision::Denied(GuardDenial::LastAdmin)
        };
        Ok(GuardCheck { target, decision })
    }
}

#[cfg(test)]
mod tests {
    use spaceshare_core::Role;
    use spaceshare_storage::{
        MemoryStorage, MembershipStorage, NewSpace, SpaceStorage, StorageError, UserDirectory,
    };
    use uuid::Uuid;

    use super::{GuardDecision, GuardDenial, MembershipGuard};

    async fn space_with_admin(storage: &MemoryStorage) -> (Uuid, Uuid) {
        let owner = storage
            .create_user("21CS001", "Owner")
            .await
            .expect("create owner");
        let space = storage
            .create_space(&NewSpace {
                id: Uuid::new_v4(),
                name: "Team".to_owned(),
                owner_id: owner.id,
                invite_token: None,
                default_join_role: Role::Member,
                own_files_only: false,
            })
            .await
            .expect("create space");
        let admin = storage
            .get_membership(space.id, owner.id)
            .await
            .expect("load membership")
            .expect("owner membership");
        (space.id, admin.id)
    }

    #[tokio::test]
    async fn sole_admin_is_protected() {
        let storage = MemoryStorage::new();
        let (space_id, admin_membership) = space_with_admin(&storage).await;

        let check = MembershipGuard::new(&storage)
            .can_remove_or_demote(space_id, admin_membership)
            .await
            .expect("run guard");
        assert_eq!(check.decision, GuardDecision::Denied(GuardDenial::LastAdmin));
        assert_eq!(GuardDenial::LastAdmin.reason(), "last admin");
    }

    #[tokio::test]
    async fn second_admin_and_non_admins_are_allowed() {
        let storage = MemoryStorage::new();
        let (space_id, admin_membership) = space_with_admin(&storage).await;
        let other = storage
            .create_user("21CS002", "Other")
            .await
            .expect("create user");
        let member = storage
            .add_member(space_id, other.id, Role::Member)
            .await
            .expect("add member");

        let guard = MembershipGuard::new(&storage);
        let check = guard
            .can_remove_or_demote(space_id, member.id)
            .await
            .expect("run guard");
        assert_eq!(check.decision, GuardDecision::Allowed);
        assert_eq!(check.target.user_id, other.id);

        storage
            .change_member_role(space_id, member.id, Role::Admin)
            .await
            .expect("promote");
        let check = guard
            .can_remove_or_demote(space_id, admin_membership)
            .await
            .expect("run guard");
        assert_eq!(check.decision, GuardDecision::Allowed);
    }

    #[tokio::test]
    async fn unknown_membership_is_not_found() {
        let storage = MemoryStorage::new();
        let (space_id, _) = space_with_admin(&storage).await;

        let error = MembershipGuard::new(&storage)
            .can_remove_or_demote(space_id, Uuid::new_v4())
            .await
            .expect_err("missing member");
        assert_eq!(error, StorageError::MemberNotFound);
    }
}
