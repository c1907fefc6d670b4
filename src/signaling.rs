//! Signaling client: named-event messaging over the relay transport.
//!
//! The client has no call-domain knowledge. Outbound messages are queued and
//! written by a single task, so `send` never waits and per-connection order is
//! preserved. Inbound messages are dispatched one at a time; every handler for
//! an event runs to completion before the next message is looked at.

use dashmap::DashMap;
pub use echocore::signaling::{
    CALL_ACCEPTED, CALL_OFFER, CALL_REJECTED, LOGGED_IN, SignalFrame, SignalingError,
};
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::transport::{Transport, TransportEvent};

pub type SignalHandler = Arc<dyn Fn(SignalFrame) -> BoxFuture<'static, ()> + Send + Sync>;

struct Registration {
    id: u64,
    once: bool,
    handler: SignalHandler,
}

/// Handle returned by [`SignalingClient::on`]; pass it to
/// [`SignalingClient::off`] to unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }
}

pub struct SignalingClient {
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedSender<String>,
    handlers: DashMap<String, Vec<Registration>>,
    next_subscription: AtomicU64,
}

impl SignalingClient {
    /// Wrap a connected transport. Must be called inside a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_pump(transport.clone(), rx));
        Arc::new(Self {
            transport,
            outbound,
            handlers: DashMap::new(),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Fire-and-forget emit. Delivery is best-effort; failures are logged only.
    pub fn send<I, S>(&self, event: &str, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_frame(SignalFrame::new(event, args));
    }

    pub fn send_frame(&self, frame: SignalFrame) {
        debug!("--> {} {:?}", frame.event, frame.args);
        if self.outbound.send(frame.encode()).is_err() {
            warn!("Signaling writer has stopped; dropping {}", frame.event);
        }
    }

    /// Register a handler invoked for every message named `event`.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(SignalFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(event, false, handler)
    }

    /// Register a handler invoked for the next message named `event` only.
    pub fn once<F, Fut>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(SignalFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(event, true, handler)
    }

    fn register<F, Fut>(&self, event: &str, once: bool, handler: F) -> Subscription
    where
        F: Fn(SignalFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let handler: SignalHandler =
            Arc::new(move |frame: SignalFrame| -> BoxFuture<'static, ()> { Box::pin(handler(frame)) });
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, once, handler });
        Subscription {
            event: event.to_string(),
            id,
        }
    }

    /// Returns false if the subscription was already gone.
    pub fn off(&self, subscription: &Subscription) -> bool {
        let Some(mut registrations) = self.handlers.get_mut(&subscription.event) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != subscription.id);
        before != registrations.len()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |r| r.len())
    }

    /// Run every handler registered for `frame.event`, in registration order.
    pub async fn dispatch(&self, frame: SignalFrame) {
        let handlers: Vec<SignalHandler> = match self.handlers.get_mut(&frame.event) {
            Some(mut registrations) => {
                let handlers = registrations.iter().map(|r| r.handler.clone()).collect();
                registrations.retain(|r| !r.once);
                handlers
            }
            None => Vec::new(),
        };

        if handlers.is_empty() {
            debug!("<-- {} (no handlers)", frame.event);
            return;
        }

        debug!("<-- {} {:?}", frame.event, frame.args);
        for handler in handlers {
            handler(frame.clone()).await;
        }
    }

    /// Inbound pump: decode transport messages and dispatch them in order.
    /// Returns when the transport disconnects.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => info!("Connected to signaling relay"),
                TransportEvent::MessageReceived(text) => match SignalFrame::decode(&text) {
                    Ok(frame) => self.dispatch(frame).await,
                    Err(e) => warn!("Dropping signaling message: {e}"),
                },
                TransportEvent::Disconnected => {
                    warn!("Signaling relay connection lost");
                    break;
                }
            }
        }
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }
}

async fn write_pump(transport: Arc<dyn Transport>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = transport.send_text(&text).await {
            warn!("Signaling send failed, message dropped: {e}");
        }
    }
    debug!("Signaling writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> SignalHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: &'static str| -> SignalHandler {
                let log = log.clone();
                Arc::new(move |frame: SignalFrame| -> BoxFuture<'static, ()> {
                    let log = log.clone();
                    Box::pin(async move {
                        log.lock()
                            .unwrap()
                            .push(format!("{tag}:{}", frame.args.join(",")));
                    })
                })
            }
        };
        (log, make)
    }

    #[tokio::test]
    async fn sends_preserve_order() {
        let (transport, mut sent) = MockTransport::new();
        let client = SignalingClient::new(transport);

        client.send(LOGGED_IN, ["alice"]);
        client.send(CALL_OFFER, ["alice", "bob"]);

        assert_eq!(
            sent.recv().await.unwrap(),
            r#"{"event":"logged-in","args":["alice"]}"#
        );
        assert_eq!(
            sent.recv().await.unwrap(),
            r#"{"event":"callOffer","args":["alice","bob"]}"#
        );
    }

    #[tokio::test]
    async fn every_handler_for_an_event_runs() {
        let (transport, _sent) = MockTransport::new();
        let client = SignalingClient::new(transport);
        let (log, make) = recorder();

        let first = make("first");
        let second = make("second");
        client.on(CALL_OFFER, move |f| first(f));
        client.on(CALL_OFFER, move |f| second(f));

        client.dispatch(SignalFrame::new(CALL_OFFER, ["bob"])).await;
        client.dispatch(SignalFrame::new(LOGGED_IN, ["ignored"])).await;

        assert_eq!(*log.lock().unwrap(), vec!["first:bob", "second:bob"]);
    }

    #[tokio::test]
    async fn once_handlers_fire_a_single_time() {
        let (transport, _sent) = MockTransport::new();
        let client = SignalingClient::new(transport);
        let (log, make) = recorder();

        let handler = make("once");
        client.once(CALL_OFFER, move |f| handler(f));
        assert_eq!(client.handler_count(CALL_OFFER), 1);

        client.dispatch(SignalFrame::new(CALL_OFFER, ["1"])).await;
        client.dispatch(SignalFrame::new(CALL_OFFER, ["2"])).await;

        assert_eq!(*log.lock().unwrap(), vec!["once:1"]);
        assert_eq!(client.handler_count(CALL_OFFER), 0);
    }

    #[tokio::test]
    async fn off_unregisters() {
        let (transport, _sent) = MockTransport::new();
        let client = SignalingClient::new(transport);
        let (log, make) = recorder();

        let handler = make("gone");
        let subscription = client.on(CALL_OFFER, move |f| handler(f));
        assert!(client.off(&subscription));
        assert!(!client.off(&subscription));

        client.dispatch(SignalFrame::new(CALL_OFFER, ["x"])).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_skips_malformed_messages_and_stops_on_disconnect() {
        let (transport, _sent) = MockTransport::new();
        let client = SignalingClient::new(transport);
        let (log, make) = recorder();
        let handler = make("offer");
        client.on(CALL_OFFER, move |f| handler(f));

        let (tx, rx) = mpsc::channel(8);
        tx.send(TransportEvent::Connected).await.unwrap();
        tx.send(TransportEvent::MessageReceived("{not json".into()))
            .await
            .unwrap();
        tx.send(TransportEvent::MessageReceived(
            SignalFrame::new(CALL_OFFER, ["carol"]).encode(),
        ))
        .await
        .unwrap();
        tx.send(TransportEvent::Disconnected).await.unwrap();
        tx.send(TransportEvent::MessageReceived(
            SignalFrame::new(CALL_OFFER, ["after"]).encode(),
        ))
        .await
        .unwrap();

        client.clone().run(rx).await;
        assert_eq!(*log.lock().unwrap(), vec!["offer:carol"]);
    }

    #[tokio::test]
    async fn send_failures_are_swallowed() {
        let (transport, mut sent) = MockTransport::new();
        let client = SignalingClient::new(transport);

        client.disconnect().await;
        client.send(LOGGED_IN, ["alice"]);
        // Nothing reaches the wire and nothing panics.
        tokio::task::yield_now().await;
        assert!(sent.try_recv().is_err());
    }
}
