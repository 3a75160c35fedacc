mod config;
mod error;
mod registry;
mod subscriber;

pub use config::BrokerConfig;
pub use error::BrokerError;
pub use registry::SpaceBroker;
pub use subscriber::{Subscriber, SubscriberId};
