//! # fdmesh-core
//!
//! The node router that ties the wire layer ([`fdmesh_network`]), the
//! failure-detector family ([`fdmesh_detectors`]), and the Chandra–Toueg
//! consensus engine ([`fdmesh_consensus`]) together into one runnable peer
//! (spec.md §4.5).

mod config;
mod node;

pub use config::{Config, ConsensusKind, DetectorKind, Protocol, UserHandler};
pub use node::{Node, NodeHandle};
