//! Top-level error aggregate for the parts of the process that need a
//! single error type: axum handlers and `main`.

use crate::grbl::{LinkError, MacroError, StreamError};
use crate::log::LogError;
use crate::recovery::RecoveryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrblError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Macro(#[from] MacroError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("{0}")]
    Startup(String),
}
