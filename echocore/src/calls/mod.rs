//! Call session state machine and room derivation.

mod room;
mod state;

pub use room::room_id;
pub use state::{CallDirection, CallSession, CallState, CallTransition, EndReason, InvalidTransition};
