#![forbid(unsafe_code)]

use std::fmt;

use spaceshare_core::Role;
use uuid::Uuid;

/// Action classes gated by the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Upload,
    DeleteOrRenameFile,
    ManageMembers,
    ManageSpace,
    View,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::DeleteOrRenameFile => "delete or rename file",
            Self::ManageMembers => "manage members",
            Self::ManageSpace => "manage space",
            Self::View => "view",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_upload: bool,
    pub can_delete_or_rename_file: bool,
    pub can_manage_members: bool,
    pub can_manage_space_settings: bool,
    pub can_view: bool,
}

impl Capabilities {
    #[must_use]
    pub const fn allows(self, action: Action) -> bool {
        match action {
            Action::Upload => self.can_upload,
            Action::DeleteOrRenameFile => self.can_delete_or_rename_file,
            Action::ManageMembers => self.can_manage_members,
            Action::ManageSpace => self.can_manage_space_settings,
            Action::View => self.can_view,
        }
    }
}

#[must_use]
pub const fn capabilities(role: Role) -> Capabilities {
    match role {
        Role::Admin => Capabilities {
            can_upload: true,
            can_delete_or_rename_file: true,
            can_manage_members: true,
            can_manage_space_settings: true,
            can_view: true,
        },
        Role::Member => Capabilities {
            can_upload: true,
            can_delete_or_rename_file: true,
            can_manage_members: false,
            can_manage_space_settings: false,
            can_view: true,
        },
        Role::Viewer => Capabilities {
            can_upload: false,
            can_delete_or_rename_file: false,
            can_manage_members: false,
            can_manage_space_settings: false,
            can_view: true,
        },
    }
}

/// Facts needed to evaluate the "own files only" predicate for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwnership {
    pub own_files_only: bool,
    pub uploaded_by: Option<Uuid>,
    pub actor: Uuid,
}

/// File-scoped predicate. Admins are exempt; everyone else may touch only
/// files they uploaded while the space restricts members to their own files.
#[must_use]
pub fn may_act_on_file(role: Role, file: &FileOwnership) -> bool {
    if role.is_admin() || !file.own_files_only {
        return true;
    }
    file.uploaded_by == Some(file.actor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingCapability(Action),
    NotUploader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Authorization decision for `role` performing `action`, optionally on a
/// specific file. The role table and the file predicate must both pass.
#[must_use]
pub fn evaluate(role: Role, action: Action, file: Option<&FileOwnership>) -> Decision {
    if !capabilities(role).allows(action) {
        return Decision::Deny(DenyReason::MissingCapability(action));
    }
    match file {
        Some(file) if !may_act_on_file(role, file) => Decision::Deny(DenyReason::NotUploader),
        _ => Decision::Allow,
    }
}
