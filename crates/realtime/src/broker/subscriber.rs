use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Handle for one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live connection the broker can hand encoded frames to.
///
/// `send` must not block; returning `false` marks the connection stale and
/// it is evicted. An evicted connection gets exactly one `close` call and is
/// expected to shut its socket so the client notices.
pub trait Subscriber: Send + Sync {
    fn send(&self, payload: Arc<str>) -> bool;
    fn user_id(&self) -> Uuid;
    fn is_closed(&self) -> bool;
    fn close(&self);
}
