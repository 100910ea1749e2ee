//! Error taxonomy for the transport and codec layers.
//!
//! Per spec.md §7, transport-transient errors (send failed, receive failed,
//! decode failed) are logged and swallowed by callers; they still need a
//! concrete type so call sites that *do* want to observe failure (tests,
//! metrics) can.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve or bind endpoint: {0}")]
    Address(#[from] anyhow::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload too large for a single datagram ({0} bytes)")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(serde_json::Error),
}
