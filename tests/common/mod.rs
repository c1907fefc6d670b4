// Shared harness for the integration tests: an in-process relay that routes
// signaling frames between clients, a recording media collaborator, and event
// helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use echo_rust::calls::{AutoAnswer, CallDecision, IncomingCallPrompt};
use echo_rust::media::{MediaConfig, MediaEvent, MediaSession, MediaSessionFactory};
use echo_rust::signaling::SignalFrame;
use echo_rust::store::{KeyValueStore, MemoryStore};
use echo_rust::transport::{Transport, TransportEvent, TransportFactory};
use echo_rust::types::events::Event;
use echo_rust::{EchoClient, Token, TokenDecoder};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

// Helper: an unsigned token for `id`
pub fn token_for(id: &str) -> Token {
    let claims = json!({ "_id": id, "name": id.to_uppercase() });
    TokenDecoder::new()
        .issue(claims.as_object().unwrap())
        .unwrap()
}

#[derive(Default)]
struct RelayState {
    online: HashMap<String, mpsc::Sender<TransportEvent>>,
    frames: Vec<SignalFrame>,
}

/// Forwards frames the way the signaling server does:
/// `callOffer(sender, receiver)` reaches the receiver as `callOffer(sender)`,
/// `callAccepted`/`callRejected(caller, receiver)` reach the caller as
/// `(receiver)`.
#[derive(Clone, Default)]
pub struct Relay {
    state: Arc<Mutex<RelayState>>,
    presence: Arc<Notify>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> RelayTransportFactory {
        RelayTransportFactory {
            relay: self.clone(),
        }
    }

    /// Every frame any client sent, in arrival order.
    pub fn frames(&self) -> Vec<SignalFrame> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.state.lock().unwrap().online.contains_key(id)
    }

    pub async fn wait_for_presence(&self, id: &str) {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.presence.notified();
                if self.is_online(id) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{id} never announced presence"));
    }

    async fn route(&self, from: &mpsc::Sender<TransportEvent>, frame: SignalFrame) {
        let delivery = {
            let mut state = self.state.lock().unwrap();
            state.frames.push(frame.clone());
            let arg = |i: usize| frame.arg(i).unwrap_or_default().to_string();

            match frame.event.as_str() {
                "logged-in" => {
                    state.online.insert(arg(0), from.clone());
                    self.presence.notify_waiters();
                    None
                }
                "callOffer" => state
                    .online
                    .get(&arg(1))
                    .map(|to| (to.clone(), SignalFrame::new("callOffer", [arg(0)]))),
                "callAccepted" | "callRejected" => state
                    .online
                    .get(&arg(0))
                    .map(|to| (to.clone(), SignalFrame::new(frame.event.clone(), [arg(1)]))),
                _ => None,
            }
        };

        if let Some((to, frame)) = delivery {
            let _ = to.send(TransportEvent::MessageReceived(frame.encode())).await;
        }
    }
}

pub struct RelayTransportFactory {
    relay: Relay,
}

#[async_trait]
impl TransportFactory for RelayTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (inbound, rx) = mpsc::channel(64);
        inbound.send(TransportEvent::Connected).await?;
        let transport = RelayConnection {
            relay: self.relay.clone(),
            inbound,
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), rx))
    }
}

struct RelayConnection {
    relay: Relay,
    inbound: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for RelayConnection {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("relay connection closed");
        }
        let frame = SignalFrame::decode(text)?;
        self.relay.route(&self.inbound, frame).await;
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.inbound.send(TransportEvent::Disconnected).await;
        }
    }
}

/// What the coordinator asked the media layer to do.
#[derive(Default)]
pub struct MediaLog {
    pub created: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub joined: Mutex<Vec<String>>,
    pub configs: Mutex<Vec<MediaConfig>>,
}

impl MediaLog {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }
}

/// Media sessions that are ready immediately and record every call.
pub struct RecordingMediaFactory(pub Arc<MediaLog>);

struct RecordingMedia(Arc<MediaLog>);

#[async_trait]
impl MediaSessionFactory for RecordingMediaFactory {
    async fn create_session(
        &self,
        config: &MediaConfig,
    ) -> Result<(Arc<dyn MediaSession>, mpsc::Receiver<MediaEvent>), anyhow::Error> {
        self.0.created.fetch_add(1, Ordering::SeqCst);
        self.0.configs.lock().unwrap().push(config.clone());
        let (tx, rx) = mpsc::channel(4);
        tx.send(MediaEvent::ReadyToCall).await?;
        Ok((Arc::new(RecordingMedia(self.0.clone())), rx))
    }
}

#[async_trait]
impl MediaSession for RecordingMedia {
    async fn join_room(&self, room: &str) -> Result<(), anyhow::Error> {
        self.0.joined.lock().unwrap().push(room.to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// A client wired to the relay with its own media log and event stream.
pub struct TestPeer {
    pub client: Arc<EchoClient>,
    pub media: Arc<MediaLog>,
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl TestPeer {
    pub async fn connect(relay: &Relay, prompt: Arc<dyn IncomingCallPrompt>) -> Self {
        Self::connect_with(relay, prompt, Arc::new(MemoryStore::new()), Default::default()).await
    }

    pub async fn connect_with(
        relay: &Relay,
        prompt: Arc<dyn IncomingCallPrompt>,
        backend: Arc<dyn KeyValueStore>,
        config: echo_rust::ClientConfig,
    ) -> Self {
        let media = Arc::new(MediaLog::default());
        let client = EchoClient::builder()
            .with_config(config)
            .with_backend(backend)
            .with_transport_factory(relay.factory())
            .with_media(RecordingMediaFactory(media.clone()))
            .with_prompt(prompt)
            .build()
            .await
            .expect("client should build");
        let events = collect_events(&client);
        Self {
            client,
            media,
            events,
        }
    }

    /// Connect, log in as `id`, and wait until the relay knows about it.
    pub async fn online(relay: &Relay, id: &str, decision: CallDecision) -> Self {
        let mut peer = Self::connect(relay, Arc::new(AutoAnswer(decision))).await;
        peer.client.login(token_for(id)).await.unwrap();
        relay.wait_for_presence(id).await;
        peer.expect(|e| matches!(e, Event::IdentityAvailable(_))).await;
        peer
    }

    /// Wait for the first event matching `predicate`, skipping others.
    pub async fn expect<F>(&mut self, predicate: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event bus closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

pub fn collect_events(client: &EchoClient) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.events().add_handler(Arc::new(move |event: &Event| {
        let _ = tx.send(event.clone());
    }));
    rx
}
