//! Host-caller errors
//!
//! Misuse of the embedding API reports through these; script-level
//! problems go through the diagnostics reporter instead.

use thiserror::Error;

use crate::context::ScriptHandle;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Embedding API errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown script handle: {0}")]
    UnknownHandle(ScriptHandle),
}
