//! # fdmesh-detectors
//!
//! The failure-detector family of spec.md §4.3: five independent algorithms
//! behind one [`FailureDetector`] trait, plus a [`GossipDetector`] decorator
//! that wraps any of them to propagate suspicions across the mesh.

pub mod config;
pub mod detector;
pub mod gossip;
pub mod heartbeat_fixed;
pub mod heartbeat_recovery;
pub mod heartbeat_suspect_level;
pub mod heartbeat_sliding;
pub mod ping_ack;

pub use config::DetectorConfig;
pub use detector::{FailureDetector, LearnNeighborFn};
pub use gossip::GossipDetector;
pub use heartbeat_fixed::HeartbeatFixedDetector;
pub use heartbeat_recovery::HeartbeatRecoveryDetector;
pub use heartbeat_sliding::HeartbeatSlidingWindowDetector;
pub use heartbeat_suspect_level::HeartbeatSuspectLevelDetector;
pub use ping_ack::PingAckDetector;
