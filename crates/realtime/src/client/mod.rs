//! Client half of the realtime contract: local reconciliation and a change
//! feed that picks push or poll.

mod transport;
mod view;

pub use transport::{
    FeedConfig, FeedError, FeedMode, FeedUpdate, SpaceFeed, DEFAULT_PUSH_TIMEOUT,
};
pub use view::{Reconcile, SpaceView};
