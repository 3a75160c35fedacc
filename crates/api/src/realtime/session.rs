use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spaceshare_core::protocol::ServerFrame;
use spaceshare_realtime::broker::Subscriber;
use spaceshare_realtime::ws::{encode_server_frame, CloseDirective};
use tokio::sync::{mpsc, watch};
use tracing::warn;
use uuid::Uuid;

pub(crate) const OUTBOUND_CHANNEL_SIZE: usize = 64;

pub(crate) type OutboundSender = mpsc::Sender<OutboundFrame>;
pub(crate) type OutboundReceiver = mpsc::Receiver<OutboundFrame>;
pub(crate) type EvictionSender = watch::Sender<bool>;
pub(crate) type EvictionReceiver = watch::Receiver<bool>;

#[derive(Debug)]
pub(crate) enum OutboundFrame {
    Text(Arc<str>),
    Close(CloseDirective),
}

pub(crate) fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(OUTBOUND_CHANNEL_SIZE)
}

/// Flips to `true` once the hub has dropped the connection.
pub(crate) fn eviction_signal() -> (EvictionSender, EvictionReceiver) {
    watch::channel(false)
}

/// Resolves when the connection is evicted. Never resolves if the signal's
/// sender goes away without firing.
pub(crate) async fn evicted(signal: &mut EvictionReceiver) {
    if signal.wait_for(|evicted| *evicted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub(crate) async fn send_close(outbound: &OutboundSender, close: CloseDirective) {
    let _ = outbound.send(OutboundFrame::Close(close)).await;
}

pub(crate) async fn send_frame(outbound: &OutboundSender, frame: &ServerFrame) {
    match encode_server_frame(frame) {
        Ok(encoded) => {
            let _ = outbound.send(OutboundFrame::Text(Arc::from(encoded))).await;
        }
        Err(error) => warn!(error = %error, "failed to encode server frame"),
    }
}

/// The hub's handle on one socket. Frames are queued without blocking; a full
/// queue reports the connection as stale, and eviction raises the signal the
/// socket tasks watch.
pub(crate) struct ConnectionSubscriber {
    user_id: Uuid,
    outbound: OutboundSender,
    closed: Arc<AtomicBool>,
    eviction: EvictionSender,
}

impl ConnectionSubscriber {
    pub(crate) fn new(
        user_id: Uuid,
        outbound: OutboundSender,
        closed: Arc<AtomicBool>,
        eviction: EvictionSender,
    ) -> Self {
        Self {
            user_id,
            outbound,
            closed,
            eviction,
        }
    }
}

impl Subscriber for ConnectionSubscriber {
    fn send(&self, payload: Arc<str>) -> bool {
        self.outbound.try_send(OutboundFrame::Text(payload)).is_ok()
    }

    fn user_id(&self) -> Uuid {
        self.user_id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed) || self.outbound.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.eviction.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use spaceshare_core::protocol::SpaceEvent;
    use spaceshare_core::ActivityAction;
    use spaceshare_realtime::broker::{BrokerConfig, Subscriber};
    use spaceshare_realtime::{FanoutHub, PushHub};
    use uuid::Uuid;

    use super::{
        evicted, eviction_signal, outbound_channel, ConnectionSubscriber, OutboundFrame,
        OUTBOUND_CHANNEL_SIZE,
    };

    #[tokio::test]
    async fn queues_frames_until_full_or_closed() {
        let (outbound, mut inbound) = outbound_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let (eviction, _eviction_rx) = eviction_signal();
        let subscriber =
            ConnectionSubscriber::new(Uuid::new_v4(), outbound, Arc::clone(&closed), eviction);

        assert!(subscriber.send(Arc::from("first")));
        match inbound.recv().await {
            Some(OutboundFrame::Text(text)) => assert_eq!(text.as_ref(), "first"),
            other => panic!("expected text frame, got {other:?}"),
        }

        for _ in 0..OUTBOUND_CHANNEL_SIZE {
            assert!(subscriber.send(Arc::from("fill")));
        }
        assert!(!subscriber.send(Arc::from("overflow")));

        assert!(!subscriber.is_closed());
        closed.store(true, Ordering::Relaxed);
        assert!(subscriber.is_closed());
    }

    #[tokio::test]
    async fn overflowing_queue_evicts_and_signals_the_socket() {
        let hub = PushHub::new(BrokerConfig::default(), Duration::from_secs(50));
        let space = Uuid::new_v4();
        let (outbound, mut inbound) = outbound_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let (eviction, mut eviction_rx) = eviction_signal();
        let subscriber = Arc::new(ConnectionSubscriber::new(
            Uuid::new_v4(),
            outbound,
            Arc::clone(&closed),
            eviction,
        ));

        let connection = hub.connect(subscriber.clone()).await.expect("connect");
        hub.subscribe(connection, space).await.expect("subscribe");

        let event = SpaceEvent::activity(ActivityAction::Upload, Some("a.txt".to_owned()));
        for _ in 0..OUTBOUND_CHANNEL_SIZE {
            assert_eq!(hub.publish(space, event.clone()).await, 1);
        }
        assert_eq!(hub.publish(space, event.clone()).await, 0);
        assert_eq!(hub.broker().watcher_count(space).await, 0);

        assert!(subscriber.is_closed());
        tokio::time::timeout(Duration::from_secs(1), evicted(&mut eviction_rx))
            .await
            .expect("eviction signalled");

        assert_eq!(hub.publish(space, event).await, 0);
        let mut queued = 0;
        while let Ok(frame) = inbound.try_recv() {
            assert!(matches!(frame, OutboundFrame::Text(_)));
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_CHANNEL_SIZE);
    }

    #[tokio::test]
    async fn dropped_signal_without_eviction_never_resolves() {
        let (eviction, mut eviction_rx) = eviction_signal();
        drop(eviction);
        let waited =
            tokio::time::timeout(Duration::from_millis(50), evicted(&mut eviction_rx)).await;
        assert!(waited.is_err());
    }
}
