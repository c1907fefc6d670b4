//! Session manager: the local identity lifecycle and the selected peer.
//!
//! Identity state is `Anonymous` (no identity) until a token decodes, then
//! `Authenticated`. A failed login never leaves a partially applied identity
//! or token behind.

use echocore::identity::{DecodeError, Identity, TokenDecoder};
use echocore::signaling::SignalFrame;
use echocore::store::StoreError;
use echocore::token::Token;
use echocore::types::events::{CoreEventBus, Event};
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::signaling::SignalingClient;
use crate::store::TokenStore;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to decode token: {0}")]
    Decode(#[from] DecodeError),

    #[error("no identity: not logged in")]
    NoIdentity,

    #[error("token storage failed: {0}")]
    Store(#[from] StoreError),
}

pub struct SessionManager {
    decoder: TokenDecoder,
    tokens: Arc<TokenStore>,
    signaling: Arc<SignalingClient>,
    events: CoreEventBus,
    identity: RwLock<Option<Identity>>,
    peer_selection: RwLock<String>,
}

impl SessionManager {
    pub fn new(
        decoder: TokenDecoder,
        tokens: Arc<TokenStore>,
        signaling: Arc<SignalingClient>,
        events: CoreEventBus,
    ) -> Self {
        Self {
            decoder,
            tokens,
            signaling,
            events,
            identity: RwLock::new(None),
            peer_selection: RwLock::new(String::new()),
        }
    }

    /// Decode `token` and make its identity the active local identity.
    ///
    /// On failure the previous identity, if any, is left in place.
    pub async fn create_identity(&self, token: &Token) -> Result<Identity, SessionError> {
        let identity = self.decoder.decode(token)?;
        self.commit_identity(identity.clone()).await;
        Ok(identity)
    }

    /// Decode, persist, then announce presence under the new identity.
    ///
    /// The token is decoded before anything is mutated and persisted before
    /// the identity is committed, so a decode or storage failure changes
    /// nothing.
    pub async fn login(&self, token: Token) -> Result<Identity, SessionError> {
        let identity = self.decoder.decode(&token)?;
        self.tokens.set_token(&token).await?;
        self.commit_identity(identity.clone()).await;
        self.announce(&identity.id);
        Ok(identity)
    }

    /// Record an authentication failure reported by the login collaborator.
    pub fn login_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Login failed: {reason}");
        self.events.dispatch(&Event::LoginFailed { reason });
    }

    /// Restore the identity from a previously stored token, re-announcing
    /// presence. Returns `Ok(None)` when no token is stored.
    pub async fn restore_session(&self) -> Result<Option<Identity>, SessionError> {
        let Some(token) = self.tokens.get_token().await? else {
            debug!("No stored token; staying anonymous");
            return Ok(None);
        };
        let identity = self.create_identity(&token).await?;
        self.announce(&identity.id);
        Ok(Some(identity))
    }

    /// Drop the local identity, the selected peer and the stored token.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.tokens.clear_token().await?;
        let previous = self.identity.write().await.take();
        self.peer_selection.write().await.clear();
        if let Some(identity) = previous {
            info!("Logged out {}", identity.id);
            self.events.dispatch(&Event::LoggedOut);
        }
        Ok(())
    }

    pub async fn get_identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub async fn get_identity_id(&self) -> Result<String, SessionError> {
        self.identity
            .read()
            .await
            .as_ref()
            .map(|identity| identity.id.clone())
            .ok_or(SessionError::NoIdentity)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.identity.read().await.is_some()
    }

    /// Replace the selected peer. At most one peer is selected at a time.
    pub async fn set_peer_selection(&self, id: impl Into<String>) {
        *self.peer_selection.write().await = id.into();
    }

    /// The selected peer id, or an empty string when none is selected.
    pub async fn get_peer_selection(&self) -> String {
        self.peer_selection.read().await.clone()
    }

    pub async fn clear_peer_selection(&self) {
        self.peer_selection.write().await.clear();
    }

    async fn commit_identity(&self, identity: Identity) {
        info!("Identity available: {} ({})", identity.id, identity.name);
        *self.identity.write().await = Some(identity.clone());
        self.events.dispatch(&Event::IdentityAvailable(identity));
    }

    fn announce(&self, id: &str) {
        self.signaling.send_frame(SignalFrame::logged_in(id));
    }
}
