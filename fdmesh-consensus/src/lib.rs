//! # fdmesh-consensus
//!
//! Chandra–Toueg rotating-coordinator consensus (spec.md §4.4): a single
//! [`ConsensusEngine`] per node that proposes, collects preferences, and
//! decides a value once a quorum of the membership agrees.

pub mod engine;
pub mod types;

pub use engine::ConsensusEngine;
pub use types::{coordinator, quorum, sorted_members, Preference};
