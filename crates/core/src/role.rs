use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role held by a member of a space. Capabilities are looked up per role,
/// never derived from an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Member, Role::Viewer];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Roles a space may hand out to invite-link joiners.
    #[must_use]
    pub const fn is_joinable(self) -> bool {
        !self.is_admin()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown role {0:?}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "viewer" => Ok(Self::Viewer),
            _ => Err(ParseRoleError(value.to_owned())),
        }
    }
}

/// Reports whether a space keeps at least one admin after the membership
/// currently holding `current` is changed to `next` (or removed when `next`
/// is `None`). `admin_count` must be read inside the same critical section
/// as the write it guards.
#[must_use]
pub fn retains_admin(current: Role, next: Option<Role>, admin_count: u64) -> bool {
    if !current.is_admin() || next.is_some_and(Role::is_admin) {
        return true;
    }
    admin_count > 1
}
