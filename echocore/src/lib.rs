//! Runtime-agnostic building blocks for the Echo calling client.
//!
//! Nothing in this crate spawns tasks or touches the network. The tokio client
//! in the workspace root composes these pieces into the token store, session
//! manager, signaling client and call coordinator.

pub mod calls;
pub mod identity;
pub mod signaling;
pub mod store;
pub mod token;
pub mod types;

pub use identity::{DecodeError, Identity, TokenDecoder};
pub use token::Token;
