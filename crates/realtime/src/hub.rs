//! Event fanout behind one interface, with a push and a poll strategy.
//!
//! The strategy is chosen once when the process starts. Publishing never
//! fails from the caller's point of view: delivery is best effort and a
//! dropped event is recovered by the client's next refetch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spaceshare_core::protocol::{
    DeliveryStrategy, RealtimeStrategyInfo, ServerFrame, SpaceEvent,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{BrokerConfig, BrokerError, SpaceBroker, Subscriber, SubscriberId};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(50);

pub type ConnectionId = SubscriberId;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("push delivery is not enabled")]
    PushUnavailable,
    #[error("too many connections for user")]
    TooManyConnections,
    #[error("connection is not registered")]
    UnknownConnection,
}

impl From<BrokerError> for HubError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::TooManyConnections => Self::TooManyConnections,
            BrokerError::SubscriberNotFound => Self::UnknownConnection,
        }
    }
}

#[async_trait]
pub trait FanoutHub: Send + Sync {
    fn strategy(&self) -> DeliveryStrategy;

    /// Interval clients should refetch at when they are not receiving pushes.
    fn poll_interval(&self) -> Duration;

    fn describe(&self) -> RealtimeStrategyInfo {
        RealtimeStrategyInfo {
            strategy: self.strategy(),
            poll_interval_secs: self.poll_interval().as_secs(),
        }
    }

    /// Returns the number of connections the event was handed to.
    async fn publish(&self, space_id: Uuid, event: SpaceEvent) -> usize;

    async fn connect(&self, subscriber: Arc<dyn Subscriber>) -> Result<ConnectionId, HubError>;
    async fn disconnect(&self, connection: ConnectionId);
    async fn subscribe(&self, connection: ConnectionId, space_id: Uuid) -> Result<(), HubError>;
    async fn unsubscribe(&self, connection: ConnectionId, space_id: Uuid)
        -> Result<(), HubError>;

    /// Stops delivering `space_id` events to every connection of `user_id`.
    async fn revoke_user(&self, space_id: Uuid, user_id: Uuid);

    /// Stops delivering `space_id` events to everyone.
    async fn close_space(&self, space_id: Uuid);
}

pub struct PushHub {
    broker: SpaceBroker,
    poll_interval: Duration,
}

impl PushHub {
    #[must_use]
    pub fn new(config: BrokerConfig, poll_interval: Duration) -> Self {
        Self {
            broker: SpaceBroker::new(config),
            poll_interval,
        }
    }

    #[must_use]
    pub fn broker(&self) -> &SpaceBroker {
        &self.broker
    }

    fn notify_left(space_id: Uuid, subscribers: Vec<Arc<dyn Subscriber>>) {
        if subscribers.is_empty() {
            return;
        }
        let Some(frame) = encode_frame(&ServerFrame::Left { space: space_id }) else {
            return;
        };
        for subscriber in subscribers {
            let _ = subscriber.send(Arc::clone(&frame));
        }
    }
}

#[async_trait]
impl FanoutHub for PushHub {
    fn strategy(&self) -> DeliveryStrategy {
        DeliveryStrategy::Push
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn publish(&self, space_id: Uuid, event: SpaceEvent) -> usize {
        let kind = event.kind();
        let Some(frame) = encode_frame(&ServerFrame::Event {
            space: space_id,
            event,
        }) else {
            return 0;
        };
        let delivered = self.broker.broadcast_space(space_id, frame).await;
        debug!(%space_id, %kind, delivered, "published space event");
        delivered
    }

    async fn connect(&self, subscriber: Arc<dyn Subscriber>) -> Result<ConnectionId, HubError> {
        Ok(self.broker.register_subscriber(subscriber).await?)
    }

    async fn disconnect(&self, connection: ConnectionId) {
        let _ = self.broker.unregister_subscriber(connection).await;
    }

    async fn subscribe(&self, connection: ConnectionId, space_id: Uuid) -> Result<(), HubError> {
        Ok(self.broker.join(connection, space_id).await?)
    }

    async fn unsubscribe(
        &self,
        connection: ConnectionId,
        space_id: Uuid,
    ) -> Result<(), HubError> {
        self.broker.leave(connection, space_id).await?;
        Ok(())
    }

    async fn revoke_user(&self, space_id: Uuid, user_id: Uuid) {
        let removed = self.broker.remove_user_from_space(user_id, space_id).await;
        debug!(%space_id, %user_id, connections = removed.len(), "revoked space subscriptions");
        Self::notify_left(space_id, removed);
    }

    async fn close_space(&self, space_id: Uuid) {
        let removed = self.broker.close_space(space_id).await;
        debug!(%space_id, connections = removed.len(), "closed space room");
        Self::notify_left(space_id, removed);
    }
}

/// Pull strategy: nothing is pushed; clients refetch every `poll_interval`.
pub struct PollingHub {
    poll_interval: Duration,
}

impl PollingHub {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for PollingHub {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[async_trait]
impl FanoutHub for PollingHub {
    fn strategy(&self) -> DeliveryStrategy {
        DeliveryStrategy::Poll
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn publish(&self, _space_id: Uuid, _event: SpaceEvent) -> usize {
        0
    }

    async fn connect(&self, _subscriber: Arc<dyn Subscriber>) -> Result<ConnectionId, HubError> {
        Err(HubError::PushUnavailable)
    }

    async fn disconnect(&self, _connection: ConnectionId) {}

    async fn subscribe(&self, _connection: ConnectionId, _space_id: Uuid) -> Result<(), HubError> {
        Err(HubError::PushUnavailable)
    }

    async fn unsubscribe(
        &self,
        _connection: ConnectionId,
        _space_id: Uuid,
    ) -> Result<(), HubError> {
        Err(HubError::PushUnavailable)
    }

    async fn revoke_user(&self, _space_id: Uuid, _user_id: Uuid) {}

    async fn close_space(&self, _space_id: Uuid) {}
}

pub(crate) fn encode_frame(frame: &ServerFrame) -> Option<Arc<str>> {
    match serde_json::to_string(frame) {
        Ok(encoded) => Some(Arc::from(encoded)),
        Err(error) => {
            warn!(%error, "failed to encode realtime frame");
            None
        }
    }
}
