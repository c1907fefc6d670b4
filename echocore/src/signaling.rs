//! Signaling wire contract.
//!
//! Every emit on the relay channel is one JSON text message carrying an event
//! name and a positional argument list:
//!
//! ```json
//! {"event":"callOffer","args":["alice","bob"]}
//! ```
//!
//! | Event          | Direction            | Args sent               | Args delivered  |
//! |----------------|----------------------|-------------------------|-----------------|
//! | `logged-in`    | client → relay       | `[local_id]`            | n/a             |
//! | `callOffer`    | client → relay → peer| `[sender_id, peer_id]`  | `[sender_id]`   |
//! | `callAccepted` | peer → relay → client| `[caller_id, local_id]` | `[receiver_id]` |
//! | `callRejected` | peer → relay → client| `[caller_id, local_id]` | `[receiver_id]` |

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LOGGED_IN: &str = "logged-in";
pub const CALL_OFFER: &str = "callOffer";
pub const CALL_ACCEPTED: &str = "callAccepted";
pub const CALL_REJECTED: &str = "callRejected";

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed signaling frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("signaling frame has an empty event name")]
    EmptyEvent,
}

/// One named message on the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFrame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl SignalFrame {
    pub fn new<I, S>(event: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event: event.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn logged_in(local_id: &str) -> Self {
        Self::new(LOGGED_IN, [local_id])
    }

    pub fn call_offer(sender_id: &str, peer_id: &str) -> Self {
        Self::new(CALL_OFFER, [sender_id, peer_id])
    }

    pub fn call_accepted(caller_id: &str, local_id: &str) -> Self {
        Self::new(CALL_ACCEPTED, [caller_id, local_id])
    }

    pub fn call_rejected(caller_id: &str, local_id: &str) -> Self {
        Self::new(CALL_REJECTED, [caller_id, local_id])
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn encode(&self) -> String {
        // A struct of strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        let frame: Self = serde_json::from_str(text)?;
        if frame.event.is_empty() {
            return Err(SignalingError::EmptyEvent);
        }
        Ok(frame)
    }
}
