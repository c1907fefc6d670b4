//! The assembled client: storage, session, signaling and calls over one relay
//! connection.

use anyhow::{Result, anyhow};
use echocore::identity::Identity;
use echocore::token::Token;
use echocore::types::events::{CoreEventBus, Event, EventHandler};
use log::info;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

use crate::calls::{
    AutoAnswer, CallCoordinator, CallDecision, CallError, IncomingCallPrompt,
};
use crate::config::ClientConfig;
use crate::media::MediaSessionFactory;
use crate::session::{SessionError, SessionManager};
use crate::signaling::SignalingClient;
use crate::store::{FileStore, KeyValueStore, TokenStore};
use crate::transport::{TokioWebSocketTransportFactory, TransportFactory};

type EventHandlerCallback =
    Arc<dyn Fn(Event, Arc<EchoClient>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Runs the user callback for each event on its own task.
struct ClientEventHandler {
    client: Weak<EchoClient>,
    callback: EventHandlerCallback,
}

impl EventHandler for ClientEventHandler {
    fn handle_event(&self, event: &Event) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let callback = self.callback.clone();
        let event = event.clone();
        tokio::spawn(async move {
            callback(event, client).await;
        });
    }
}

pub struct EchoClient {
    config: ClientConfig,
    tokens: Arc<TokenStore>,
    session: Arc<SessionManager>,
    signaling: Arc<SignalingClient>,
    calls: Arc<CallCoordinator>,
    events: CoreEventBus,
    pump: JoinHandle<()>,
}

impl EchoClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token_store(&self) -> Arc<TokenStore> {
        self.tokens.clone()
    }

    pub fn session(&self) -> Arc<SessionManager> {
        self.session.clone()
    }

    pub fn signaling(&self) -> Arc<SignalingClient> {
        self.signaling.clone()
    }

    pub fn calls(&self) -> Arc<CallCoordinator> {
        self.calls.clone()
    }

    pub fn events(&self) -> &CoreEventBus {
        &self.events
    }

    /// Resume the identity behind a previously stored token, if any.
    pub async fn restore_session(&self) -> Result<Option<Identity>, SessionError> {
        self.session.restore_session().await
    }

    /// Log in with `token`. A rejected token is also reported as
    /// `LoginFailed`.
    pub async fn login(&self, token: Token) -> Result<Identity, SessionError> {
        match self.session.login(token).await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                self.session.login_failure(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.calls.end_call().await;
        self.session.logout().await
    }

    /// Select `peer` and offer it a call.
    pub async fn call(&self, peer: &str) -> Result<u64, CallError> {
        self.session.set_peer_selection(peer).await;
        self.calls.send_offer().await
    }

    pub async fn end_call(&self) -> bool {
        self.calls.end_call().await
    }

    /// Hang up, close the relay connection and stop the inbound pump.
    pub async fn disconnect(&self) {
        self.calls.end_call().await;
        self.signaling.disconnect().await;
        self.pump.abort();
        info!("Client disconnected");
    }

    pub fn is_running(&self) -> bool {
        !self.pump.is_finished()
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    backend: Option<Arc<dyn KeyValueStore>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    media: Option<Arc<dyn MediaSessionFactory>>,
    prompt: Option<Arc<dyn IncomingCallPrompt>>,
    event_handler: Option<EventHandlerCallback>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom key-value backend instead of a [`FileStore`] at the
    /// configured store path.
    pub fn with_backend(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a custom transport instead of a WebSocket to the configured relay.
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: TransportFactory + 'static,
    {
        self.transport_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_media<F>(mut self, factory: F) -> Self
    where
        F: MediaSessionFactory + 'static,
    {
        self.media = Some(Arc::new(factory));
        self
    }

    /// Decides incoming offers. Defaults to rejecting every offer.
    pub fn with_prompt(mut self, prompt: Arc<dyn IncomingCallPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event, Arc<EchoClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_handler = Some(Arc::new(move |event, client| {
            Box::pin(handler(event, client))
        }));
        self
    }

    /// Connect to the relay and assemble the client.
    pub async fn build(self) -> Result<Arc<EchoClient>> {
        let media = self
            .media
            .ok_or_else(|| anyhow!("A media session factory is required"))?;

        let backend: Arc<dyn KeyValueStore> = match self.backend {
            Some(backend) => backend,
            None => {
                info!("Opening file store at '{}'", self.config.store_path);
                Arc::new(FileStore::new(&self.config.store_path).await.map_err(|e| {
                    anyhow!(
                        "Failed to open store at '{}': {}",
                        self.config.store_path,
                        e
                    )
                })?)
            }
        };
        let transport_factory = self.transport_factory.unwrap_or_else(|| {
            Arc::new(TokioWebSocketTransportFactory::new(
                self.config.relay_url.clone(),
            ))
        });
        let prompt = self.prompt.unwrap_or_else(|| {
            info!("No call prompt configured; incoming calls will be rejected");
            Arc::new(AutoAnswer(CallDecision::Reject))
        });

        info!("Connecting to signaling relay...");
        let (transport, transport_events) = transport_factory
            .create_transport()
            .await
            .map_err(|e| anyhow!("Failed to connect to signaling relay: {}", e))?;

        let events = CoreEventBus::new();
        let tokens = Arc::new(TokenStore::new(backend));
        let signaling = SignalingClient::new(transport);
        let session = Arc::new(SessionManager::new(
            self.config.token_decoder(),
            tokens.clone(),
            signaling.clone(),
            events.clone(),
        ));
        let calls = CallCoordinator::new(
            session.clone(),
            signaling.clone(),
            media,
            prompt,
            events.clone(),
            self.config.calls.clone(),
        );
        let pump = tokio::spawn(signaling.clone().run(transport_events));

        let client = Arc::new(EchoClient {
            config: self.config,
            tokens,
            session,
            signaling,
            calls,
            events,
            pump,
        });

        if let Some(callback) = self.event_handler {
            client.events.add_handler(Arc::new(ClientEventHandler {
                client: Arc::downgrade(&client),
                callback,
            }));
        }

        Ok(client)
    }
}
