//! Echo calling client.
//!
//! Logs a user in from a bearer token, announces presence on a signaling
//! relay, and runs the offer/accept/reject handshake that leads two clients
//! into a shared media room.

pub use echocore::{DecodeError, Identity, Token, TokenDecoder};

pub mod types {
    pub use echocore::types::*;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod media;
pub mod session;
pub mod signaling;
pub mod store;
pub mod transport;

pub use client::{ClientBuilder, EchoClient};
pub use config::ClientConfig;
