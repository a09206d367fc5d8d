//! Error taxonomy shared across components.
//!
//! Errors are handled at the component boundary where they are first
//! meaningful: the consensus engine never propagates a validation error
//! upward and the request manager never propagates a transient I/O
//! error upward. Invariant violations are not modeled here — a broken
//! internal postcondition panics, because continuing would fork or
//! corrupt the chain.

use thiserror::Error;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CoreError {
    /// A signature, hash, or structural check failed on an incoming
    /// message. The message is dropped; the peer is not penalized.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The local state cannot process the message yet; the producer is
    /// expected to retry.
    #[error("not ready: {0}")]
    NotReady(String),

    /// A peer response contradicted the protocol; the peer's
    /// active-peer score is decremented.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A single backend operation failed; retried on the next tick.
    #[error("transient i/o failure: {0}")]
    TransientIo(String),

    /// Transaction admission failures, surfaced to the mempool with a
    /// structured reason, never fatal.
    #[error("insufficient or malformed fee: {0}")]
    Fee(String),

    #[error("stake rejected: {0}")]
    Stake(String),

    #[error("license rejected: {0}")]
    License(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        CoreError::NotReady(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        CoreError::Protocol(msg.into())
    }
}
