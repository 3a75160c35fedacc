use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed vocabulary of actions recorded in a space's activity ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    SpaceCreate,
    SpaceRename,
    Upload,
    Rename,
    Delete,
    MemberAdd,
    MemberRemove,
    MemberRole,
}

impl ActivityAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpaceCreate => "space_create",
            Self::SpaceRename => "space_rename",
            Self::Upload => "upload",
            Self::Rename => "rename",
            Self::Delete => "delete",
            Self::MemberAdd => "member_add",
            Self::MemberRemove => "member_remove",
            Self::MemberRole => "member_role",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown activity action {0:?}")]
pub struct ParseActivityActionError(pub String);

impl FromStr for ActivityAction {
    type Err = ParseActivityActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "space_create" => Ok(Self::SpaceCreate),
            "space_rename" => Ok(Self::SpaceRename),
            "upload" => Ok(Self::Upload),
            "rename" => Ok(Self::Rename),
            "delete" => Ok(Self::Delete),
            "member_add" => Ok(Self::MemberAdd),
            "member_remove" => Ok(Self::MemberRemove),
            "member_role" => Ok(Self::MemberRole),
            _ => Err(ParseActivityActionError(value.to_owned())),
        }
    }
}
