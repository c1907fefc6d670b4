//! Call signaling: the offer/accept/reject handshake between two clients and
//! the media session that follows it.
//!
//! # Architecture
//!
//! - [`CallSession`] & [`CallState`]: per-call state machine (from `echocore`)
//! - [`CallCoordinator`]: drives the handshake over the signaling client and
//!   owns the media session
//! - [`IncomingCallPrompt`]: the asynchronous accept/reject decision point
//!
//! # Protocol Overview
//!
//! The caller emits `callOffer(self, peer)`. The relay delivers
//! `callOffer(caller)` to the peer, whose coordinator asks its prompt and
//! replies `callAccepted(caller, self)` or `callRejected(caller, self)`. The
//! relay delivers the reply to the caller as `callAccepted(peer)` /
//! `callRejected(peer)`. After acceptance both sides create a media session
//! and join the same room.

mod coordinator;
mod error;
mod prompt;

pub use coordinator::{CallCoordinator, CallCoordinatorConfig};
pub use echocore::calls::{CallDirection, CallSession, CallState, EndReason, room_id};
pub use error::CallError;
pub use prompt::{AutoAnswer, CallDecision, ChannelPrompt, IncomingCallPrompt, PendingDecision};
