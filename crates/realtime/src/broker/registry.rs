use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broker::{BrokerConfig, BrokerError, Subscriber, SubscriberId};

/// Registry of live connections and the spaces ("rooms") each one watches.
pub struct SpaceBroker {
    config: BrokerConfig,
    next_subscriber_id: AtomicU64,
    state: RwLock<BrokerState>,
}

impl SpaceBroker {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            next_subscriber_id: AtomicU64::new(1),
            state: RwLock::new(BrokerState::default()),
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        let state = self.state.read().await;
        state.user_index.get(&user_id).map_or(0, HashSet::len)
    }

    pub async fn watcher_count(&self, space_id: Uuid) -> usize {
        let state = self.state.read().await;
        state.space_index.get(&space_id).map_or(0, HashSet::len)
    }

    pub async fn register_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriberId, BrokerError> {
        let user_id = subscriber.user_id();
        let mut state = self.state.write().await;
        let current = state.user_index.get(&user_id).map_or(0, HashSet::len);
        if current >= self.config.max_connections_per_user {
            return Err(BrokerError::TooManyConnections);
        }

        let subscriber_id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));
        state.subscribers.insert(
            subscriber_id,
            Registration {
                subscriber,
                spaces: HashSet::new(),
            },
        );
        state
            .user_index
            .entry(user_id)
            .or_default()
            .insert(subscriber_id);
        Ok(subscriber_id)
    }

    pub async fn unregister_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        if state.remove_subscriber(subscriber_id) {
            Ok(())
        } else {
            Err(BrokerError::SubscriberNotFound)
        }
    }

    /// Adds `space_id` to the connection's rooms. Joining twice is a no-op.
    pub async fn join(
        &self,
        subscriber_id: SubscriberId,
        space_id: Uuid,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        let registration = state
            .subscribers
            .get_mut(&subscriber_id)
            .ok_or(BrokerError::SubscriberNotFound)?;
        registration.spaces.insert(space_id);
        state
            .space_index
            .entry(space_id)
            .or_default()
            .insert(subscriber_id);
        Ok(())
    }

    /// Returns whether the connection was in the room.
    pub async fn leave(
        &self,
        subscriber_id: SubscriberId,
        space_id: Uuid,
    ) -> Result<bool, BrokerError> {
        let mut state = self.state.write().await;
        let registration = state
            .subscribers
            .get_mut(&subscriber_id)
            .ok_or(BrokerError::SubscriberNotFound)?;
        let was_member = registration.spaces.remove(&space_id);
        state.unindex(space_id, subscriber_id);
        Ok(was_member)
    }

    /// Drops every connection of `user_id` from one room and returns them.
    pub async fn remove_user_from_space(
        &self,
        user_id: Uuid,
        space_id: Uuid,
    ) -> Vec<Arc<dyn Subscriber>> {
        let mut state = self.state.write().await;
        let connections: Vec<SubscriberId> = state
            .user_index
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut removed = Vec::new();
        for subscriber_id in connections {
            let Some(registration) = state.subscribers.get_mut(&subscriber_id) else {
                continue;
            };
            if registration.spaces.remove(&space_id) {
                removed.push(Arc::clone(&registration.subscriber));
                state.unindex(space_id, subscriber_id);
            }
        }
        removed
    }

    /// Empties a room entirely and returns the connections that were in it.
    pub async fn close_space(&self, space_id: Uuid) -> Vec<Arc<dyn Subscriber>> {
        let mut state = self.state.write().await;
        let Some(watchers) = state.space_index.remove(&space_id) else {
            return Vec::new();
        };
        watchers
            .into_iter()
            .filter_map(|subscriber_id| {
                let registration = state.subscribers.get_mut(&subscriber_id)?;
                registration.spaces.remove(&space_id);
                Some(Arc::clone(&registration.subscriber))
            })
            .collect()
    }

    /// Hands `payload` to every open connection in the room and returns how
    /// many accepted it. Connections that are closed or whose queue is full
    /// are evicted afterwards and told to close.
    pub async fn broadcast_space(&self, space_id: Uuid, payload: Arc<str>) -> usize {
        let mut delivered_count = 0;
        let mut stale_subscribers = Vec::new();
        {
            let state = self.state.read().await;
            let Some(watchers) = state.space_index.get(&space_id) else {
                return 0;
            };
            for subscriber_id in watchers {
                let Some(registration) = state.subscribers.get(subscriber_id) else {
                    continue;
                };
                let subscriber = &registration.subscriber;
                if subscriber.is_closed() || !subscriber.send(Arc::clone(&payload)) {
                    stale_subscribers.push((*subscriber_id, Arc::clone(subscriber)));
                } else {
                    delivered_count += 1;
                }
            }
        }

        if !stale_subscribers.is_empty() {
            let evicted: Vec<Arc<dyn Subscriber>> = {
                let mut state = self.state.write().await;
                stale_subscribers
                    .into_iter()
                    .filter(|(subscriber_id, _)| state.remove_subscriber(*subscriber_id))
                    .map(|(_, subscriber)| subscriber)
                    .collect()
            };
            // Another broadcast may have evicted the same connection first.
            for subscriber in evicted {
                subscriber.close();
            }
        }

        delivered_count
    }
}

struct Registration {
    subscriber: Arc<dyn Subscriber>,
    spaces: HashSet<Uuid>,
}

#[derive(Default)]
struct BrokerState {
    subscribers: HashMap<SubscriberId, Registration>,
    space_index: HashMap<Uuid, HashSet<SubscriberId>>,
    user_index: HashMap<Uuid, HashSet<SubscriberId>>,
}

impl BrokerState {
    fn unindex(&mut self, space_id: Uuid, subscriber_id: SubscriberId) {
        if let Some(watchers) = self.space_index.get_mut(&space_id) {
            watchers.remove(&subscriber_id);
            if watchers.is_empty() {
                self.space_index.remove(&space_id);
            }
        }
    }

    fn remove_subscriber(&mut self, subscriber_id: SubscriberId) -> bool {
        let Some(registration) = self.subscribers.remove(&subscriber_id) else {
            return false;
        };

        for space_id in registration.spaces {
            self.unindex(space_id, subscriber_id);
        }

        let user_id = registration.subscriber.user_id();
        if let Some(connections) = self.user_index.get_mut(&user_id) {
            connections.remove(&subscriber_id);
            if connections.is_empty() {
                self.user_index.remove(&user_id);
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::SpaceBroker;
    use crate::broker::{BrokerConfig, BrokerError, Subscriber};

    struct MockSubscriber {
        user_id: Uuid,
        closed: AtomicBool,
        send_ok: AtomicBool,
        close_calls: AtomicUsize,
        inbox: Mutex<Vec<String>>,
    }

    impl MockSubscriber {
        fn new(user_id: Uuid) -> Self {
            Self {
                user_id,
                closed: AtomicBool::new(false),
                send_ok: AtomicBool::new(true),
                close_calls: AtomicUsize::new(0),
                inbox: Mutex::new(Vec::new()),
            }
        }

        fn received(&self) -> Vec<String> {
            self.inbox.lock().expect("lock inbox").clone()
        }
    }

    impl Subscriber for MockSubscriber {
        fn send(&self, payload: Arc<str>) -> bool {
            if !self.send_ok.load(Ordering::Relaxed) {
                return false;
            }
            self.inbox
                .lock()
                .expect("lock inbox")
                .push(payload.to_string());
            true
        }

        fn user_id(&self) -> Uuid {
            self.user_id
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::Relaxed);
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    fn payload(text: &str) -> Arc<str> {
        Arc::from(text)
    }

    #[tokio::test]
    async fn register_enforces_per_user_limit() {
        let broker = SpaceBroker::new(BrokerConfig {
            max_connections_per_user: 1,
        });
        let user = Uuid::new_v4();
        let first = broker
            .register_subscriber(Arc::new(MockSubscriber::new(user)))
            .await
            .expect("register first subscriber");
        let error = broker
            .register_subscriber(Arc::new(MockSubscriber::new(user)))
            .await
            .expect_err("second subscriber should exceed limit");
        assert_eq!(error, BrokerError::TooManyConnections);

        broker
            .register_subscriber(Arc::new(MockSubscriber::new(Uuid::new_v4())))
            .await
            .expect("other users are counted separately");

        broker
            .unregister_subscriber(first)
            .await
            .expect("unregister first");
        broker
            .register_subscriber(Arc::new(MockSubscriber::new(user)))
            .await
            .expect("slot is released on unregister");
    }

    #[tokio::test]
    async fn broadcast_targets_only_the_room() {
        let broker = SpaceBroker::new(BrokerConfig::default());
        let space_a = Uuid::new_v4();
        let space_b = Uuid::new_v4();
        let sub_a = Arc::new(MockSubscriber::new(Uuid::new_v4()));
        let sub_b = Arc::new(MockSubscriber::new(Uuid::new_v4()));

        let id_a = broker
            .register_subscriber(sub_a.clone())
            .await
            .expect("register a");
        let id_b = broker
            .register_subscriber(sub_b.clone())
            .await
            .expect("register b");
        broker.join(id_a, space_a).await.expect("join a");
        broker.join(id_a, space_b).await.expect("join a to b");
        broker.join(id_b, space_b).await.expect("join b");

        assert_eq!(broker.broadcast_space(space_a, payload("one")).await, 1);
        assert_eq!(broker.broadcast_space(space_b, payload("two")).await, 2);
        assert_eq!(sub_a.received(), vec!["one", "two"]);
        assert_eq!(sub_b.received(), vec!["two"]);
    }

    #[tokio::test]
    async fn join_and_leave_update_fanout() {
        let broker = SpaceBroker::new(BrokerConfig::default());
        let space = Uuid::new_v4();
        let subscriber = Arc::new(MockSubscriber::new(Uuid::new_v4()));
        let id = broker
            .register_subscriber(subscriber.clone())
            .await
            .expect("register subscriber");

        assert_eq!(broker.broadcast_space(space, payload("x")).await, 0);

        broker.join(id, space).await.expect("join");
        broker.join(id, space).await.expect("join twice");
        assert_eq!(broker.watcher_count(space).await, 1);
        assert_eq!(broker.broadcast_space(space, payload("x")).await, 1);

        assert!(broker.leave(id, space).await.expect("leave"));
        assert!(!broker.leave(id, space).await.expect("leave again"));
        assert_eq!(broker.broadcast_space(space, payload("x")).await, 0);
        assert_eq!(subscriber.received().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_evicts_closed_or_full_subscribers() {
        let broker = SpaceBroker::new(BrokerConfig::default());
        let space = Uuid::new_v4();
        let user = Uuid::new_v4();
        let closed = Arc::new(MockSubscriber::new(user));
        let full = Arc::new(MockSubscriber::new(user));
        let healthy = Arc::new(MockSubscriber::new(Uuid::new_v4()));
        closed.closed.store(true, Ordering::Relaxed);
        full.send_ok.store(false, Ordering::Relaxed);

        for subscriber in [closed.clone(), full.clone(), healthy.clone()] {
            let id = broker
                .register_subscriber(subscriber)
                .await
                .expect("register");
            broker.join(id, space).await.expect("join");
        }

        assert_eq!(broker.broadcast_space(space, payload("x")).await, 1);
        assert_eq!(healthy.received().len(), 1);
        assert_eq!(broker.connection_count(user).await, 0);
        assert_eq!(broker.watcher_count(space).await, 1);

        assert_eq!(full.close_calls.load(Ordering::Relaxed), 1);
        assert_eq!(closed.close_calls.load(Ordering::Relaxed), 1);
        assert_eq!(healthy.close_calls.load(Ordering::Relaxed), 0);

        assert_eq!(broker.broadcast_space(space, payload("y")).await, 1);
        assert_eq!(full.close_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn remove_user_from_space_keeps_other_rooms() {
        let broker = SpaceBroker::new(BrokerConfig::default());
        let space = Uuid::new_v4();
        let other_space = Uuid::new_v4();
        let user = Uuid::new_v4();
        let subscriber = Arc::new(MockSubscriber::new(user));
        let bystander = Arc::new(MockSubscriber::new(Uuid::new_v4()));

        let id = broker
            .register_subscriber(subscriber.clone())
            .await
            .expect("register");
        broker.join(id, space).await.expect("join");
        broker.join(id, other_space).await.expect("join other");
        let bystander_id = broker
            .register_subscriber(bystander.clone())
            .await
            .expect("register bystander");
        broker.join(bystander_id, space).await.expect("join");

        let removed = broker.remove_user_from_space(user, space).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(broker.broadcast_space(space, payload("x")).await, 1);
        assert_eq!(broker.broadcast_space(other_space, payload("y")).await, 1);
        assert_eq!(subscriber.received(), vec!["y"]);
        assert_eq!(broker.connection_count(user).await, 1);
    }

    #[tokio::test]
    async fn close_space_empties_room() {
        let broker = SpaceBroker::new(BrokerConfig::default());
        let space = Uuid::new_v4();
        let subscriber = Arc::new(MockSubscriber::new(Uuid::new_v4()));
        let id = broker
            .register_subscriber(subscriber.clone())
            .await
            .expect("register");
        broker.join(id, space).await.expect("join");

        assert_eq!(broker.close_space(space).await.len(), 1);
        assert!(broker.close_space(space).await.is_empty());
        assert_eq!(broker.broadcast_space(space, payload("x")).await, 0);
        assert!(!broker.leave(id, space).await.expect("leave after close"));
    }

    #[tokio::test]
    async fn unregister_cleans_indexes_and_rejects_unknown_subscriber() {
        let broker = SpaceBroker::new(BrokerConfig::default());
        let space = Uuid::new_v4();
        let user = Uuid::new_v4();
        let id = broker
            .register_subscriber(Arc::new(MockSubscriber::new(user)))
            .await
            .expect("register subscriber");
        broker.join(id, space).await.expect("join");

        broker
            .unregister_subscriber(id)
            .await
            .expect("unregister subscriber");
        assert_eq!(broker.connection_count(user).await, 0);
        assert_eq!(broker.watcher_count(space).await, 0);

        assert_eq!(
            broker.unregister_subscriber(id).await,
            Err(BrokerError::SubscriberNotFound)
        );
        assert_eq!(
            broker.join(id, space).await,
            Err(BrokerError::SubscriberNotFound)
        );
    }
}
