//! Transport abstraction (spec.md §4.1): send a typed message to a
//! `host:port`; continuously receive byte frames and hand them to a router
//! callback.
//!
//! Two variants are provided: [`crate::udp::UdpTransport`] (datagram, lossy,
//! one message per packet) and [`crate::tcp::TcpTransport`] (length-prefixed
//! stream). Both log-and-swallow send failures per spec.md §4.1 ("Transport
//! failures are logged and swallowed; this is deliberate") — `send` still
//! returns a `Result` so tests and metrics can observe the failure, but no
//! detector or consensus call site propagates it with `?`.

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::TransportError;

/// A callback invoked with the raw payload bytes of each inbound frame.
/// Implemented as a boxed closure rather than a generic so `Transport` stays
/// object-safe and a single `Arc<dyn Transport>` can be shared between the
/// node, the failure detector, and the consensus engine (spec.md §9:
/// "the node owns the transport exclusively; detector and consensus borrow a
/// reference to send messages").
pub type FrameHandler = std::sync::Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Encode-then-send a single message to `to`. Never fails the caller in
    /// practice (errors are logged internally); the `Result` exists for
    /// tests that want to assert on it directly.
    async fn send(&self, bytes: &[u8], to: &Endpoint) -> Result<(), TransportError>;

    /// Run the receive loop forever, handing each inbound frame's payload to
    /// `on_frame`. A decode or processing error inside a single frame must
    /// never terminate the loop (spec.md §4.1).
    async fn receive_loop(&self, on_frame: FrameHandler) -> Result<(), TransportError>;

    /// The endpoint this transport is bound to.
    fn local_endpoint(&self) -> &Endpoint;
}
