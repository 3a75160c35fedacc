#![forbid(unsafe_code)]

pub mod activity;
pub mod protocol;
pub mod role;
pub mod validation;

pub use activity::{ActivityAction, ParseActivityActionError};
pub use role::{retains_admin, ParseRoleError, Role};
