//! # fdmesh-network
//!
//! Wire-level foundation for the fdmesh peer-to-peer framework: peer
//! identity ([`Endpoint`]), the tagged-JSON wire protocol ([`WireMessage`]
//! and friends), the [`Transport`] abstraction with its UDP (datagram) and
//! TCP (length-prefixed stream) implementations, and an injectable
//! millisecond [`Clock`] used throughout the detector and consensus timing
//! math.
//!
//! This crate has no dependency on `fdmesh-detectors` or `fdmesh-consensus`
//! by design: it is the lowest layer both of those build on, so that a
//! decoded [`WireMessage`] can be handed first to the failure detector, then
//! to consensus, without either crate needing to know about the other
//! (spec.md §4.5's router dispatch chain).

pub mod clock;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoint::Endpoint;
pub use error::{CodecError, TransportError};
pub use message::{ConsensusMessage, DetectorMessage, WireMessage};
pub use tcp::TcpTransport;
pub use transport::{FrameHandler, Transport};
pub use udp::UdpTransport;
