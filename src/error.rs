//! Top-level error for the host driver.

use thiserror::Error;

use crate::device::DeviceError;
use crate::jit::{EntryError, LoadError, SessionError, TargetError};
use crate::payload::PayloadError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("native target bootstrap failed: {0}")]
    Target(#[from] TargetError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Print to stderr. IR errors are rendered against their source.
    pub fn render(&self) {
        match self {
            BridgeError::Load(err) => err.render(),
            other => eprintln!("error: {}", other),
        }
    }
}
