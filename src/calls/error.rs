//! Call-related error types.

use echocore::calls::InvalidTransition;
use thiserror::Error;

use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no peer selected")]
    NoPeerSelected,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("a call with {0} is already in progress")]
    CallInProgress(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),
}
