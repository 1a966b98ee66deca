//! Error types for the redundancy controller

use std::fmt;
use thiserror::Error;

/// Failure talking to the instance record store. Always transient for the controller.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Instance record missing: {0}")]
    Missing(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Administrative decisions that end the process. There is no auto-recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The instance record has `enabled = false`
    Disabled,
    /// The record restricts activity to nodes that do not include this one
    NodeNotAllowed,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::Disabled => write!(f, "instance disabled"),
            FatalReason::NodeNotAllowed => write!(f, "node name not allowed"),
        }
    }
}

/// Outcome of a single poll that did not produce a decision.
#[derive(Error, Debug)]
pub enum PollError {
    /// Store read or write failed; the previous decision stands
    #[error("Transient store fault: {0}")]
    Transient(#[source] StoreError),

    #[error("Fatal redundancy policy: {0}")]
    Fatal(FatalReason),

    /// Another poll holds the controller state; this one was skipped
    #[error("A redundancy poll is already in flight")]
    InFlight,
}

impl PollError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PollError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum StandbyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Already running")]
    AlreadyRunning,

    #[error("Redundancy controller terminated: {0}")]
    Terminated(FatalReason),

    #[error("Status channel closed")]
    ChannelClosed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, StandbyError>;
