use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::FileView;
use crate::ActivityAction;

/// Change notification fanned out to every connection watching a space.
///
/// `MembershipChanged` and `ActivityAppended` are refetch hints: they do not
/// carry the authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SpaceEvent {
    FileUpserted(FileView),
    FileDeleted {
        id: Uuid,
    },
    MembershipChanged,
    ActivityAppended {
        action: ActivityAction,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        target: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FileUpserted,
    FileDeleted,
    MembershipChanged,
    ActivityAppended,
}

impl SpaceEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FileUpserted(_) => EventKind::FileUpserted,
            Self::FileDeleted { .. } => EventKind::FileDeleted,
            Self::MembershipChanged => EventKind::MembershipChanged,
            Self::ActivityAppended { .. } => EventKind::ActivityAppended,
        }
    }

    #[must_use]
    pub fn activity(action: ActivityAction, target: impl Into<Option<String>>) -> Self {
        Self::ActivityAppended {
            action,
            target: target.into(),
        }
    }
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileUpserted => "file_upserted",
            Self::FileDeleted => "file_deleted",
            Self::MembershipChanged => "membership_changed",
            Self::ActivityAppended => "activity_appended",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
