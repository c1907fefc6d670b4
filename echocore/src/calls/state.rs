//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::room::room_id;

/// Current state of a call.
///
/// `Idle` is both the state before an outgoing offer is sent and the terminal
/// state; a session that returns to `Idle` is discarded by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Outgoing call: offer sent, waiting for the peer.
    OfferSent { sent_at: DateTime<Utc> },
    /// Incoming call: waiting for the local decision.
    OfferReceived { received_at: DateTime<Utc> },
    /// Handshake complete; the media session joins `room`.
    Connected {
        connected_at: DateTime<Utc>,
        room: String,
    },
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::OfferSent { .. } | Self::OfferReceived { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::OfferReceived { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Why a session left the non-idle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Local `end_call`.
    Hangup,
    /// The peer answered `callRejected`.
    Rejected,
    /// The local user declined, or never decided in time.
    Declined,
    /// The peer never answered the offer.
    NoAnswer,
    /// The media session reported a disconnect.
    Disconnected,
    /// The media session could not be created.
    MediaFailed,
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    OfferSent,
    RemoteAccepted,
    LocalAccepted,
    Terminated { reason: EndReason },
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// One pending or active call between the local identity and a peer.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    /// Local attempt number, used to discard callbacks from earlier attempts.
    pub id: u64,
    pub local_id: String,
    pub remote_id: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    /// Set once the session has terminated.
    pub end_reason: Option<EndReason>,
}

impl CallSession {
    pub fn new_outgoing(id: u64, local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            id,
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            direction: CallDirection::Outgoing,
            state: CallState::Idle,
            created_at: Utc::now(),
            end_reason: None,
        }
    }

    pub fn new_incoming(id: u64, local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            direction: CallDirection::Incoming,
            state: CallState::OfferReceived { received_at: now },
            created_at: now,
            end_reason: None,
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    pub fn room_id(&self) -> String {
        room_id(&self.local_id, &self.remote_id)
    }

    pub fn is_ended(&self) -> bool {
        self.end_reason.is_some()
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        use CallTransition as T;
        use EndReason as R;

        let new_state = match (&self.state, transition) {
            (CallState::Idle, T::OfferSent)
                if self.is_initiator() && self.end_reason.is_none() =>
            {
                CallState::OfferSent {
                    sent_at: Utc::now(),
                }
            }
            (CallState::OfferSent { .. }, T::RemoteAccepted) => CallState::Connected {
                connected_at: Utc::now(),
                room: self.room_id(),
            },
            (CallState::OfferReceived { .. }, T::LocalAccepted) => CallState::Connected {
                connected_at: Utc::now(),
                room: self.room_id(),
            },
            (
                CallState::OfferSent { .. },
                T::Terminated {
                    reason: reason @ (R::Rejected | R::NoAnswer | R::Hangup),
                },
            )
            | (
                CallState::OfferReceived { .. },
                T::Terminated {
                    reason: reason @ (R::Declined | R::Hangup),
                },
            )
            | (
                CallState::Connected { .. },
                T::Terminated {
                    reason: reason @ (R::Hangup | R::Disconnected | R::MediaFailed),
                },
            ) => {
                self.end_reason = Some(reason);
                CallState::Idle
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}
