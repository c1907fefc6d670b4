use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::calls::EndReason;
use crate::identity::Identity;

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        // Snapshot so a handler may register further handlers.
        let handlers = self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .clone();
        for handler in handlers {
            handler.handle_event(event);
        }
    }
}

impl std::fmt::Debug for CoreEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreEventBus")
            .field("has_handlers", &self.has_handlers())
            .finish()
    }
}

/// Application-wide notifications raised by the session manager and the
/// call coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    /// A token was decoded and its identity is now the active local user.
    IdentityAvailable(Identity),
    /// Authentication failed; no identity or token state was changed.
    LoginFailed { reason: String },
    LoggedOut,

    /// A peer offered a call; the local decision is pending.
    IncomingCall { caller: String },
    /// An offer arrived while another call was pending or active and was
    /// answered with `callRejected`.
    BusyRejected { caller: String },
    /// Handshake complete on this side; the media session is being created.
    CallConnected { peer: String, room: String },
    /// The media session reported readiness and joined the room.
    MediaJoined { peer: String, room: String },
    CallEnded { peer: String, reason: EndReason },
}
