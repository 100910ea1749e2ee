//! Node configuration (spec.md §6): everything a `Node` needs to start is
//! constructed programmatically, not loaded from a file — there is no
//! configuration file format and no environment variable surface.

use std::sync::Arc;

use fdmesh_network::Endpoint;

/// Transport protocol a node communicates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Which failure-detector algorithm a node runs (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    PingAck,
    SimpleHeartbeat,
    HeartbeatRecovery,
    HeartbeatSlidingWindow,
    HeartbeatSuspectLevel,
}

/// The consensus algorithm a node runs. Chandra–Toueg is the only
/// implementation (spec.md §4.4); the enum exists so the configuration
/// surface mirrors spec.md §6's `consensus ∈ {ChandraToueg}` exactly, and so
/// an unknown future selection is a configuration error rather than a
/// silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusKind {
    ChandraToueg,
}

/// A decoded, already-typed application message handed to the user callback
/// once the detector and consensus layers have both declined to handle it.
pub type UserHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Full configuration for one [`crate::node::Node`] (spec.md §6).
#[derive(Clone)]
pub struct Config {
    pub self_endpoint: Endpoint,
    pub neighbors: Vec<Endpoint>,
    pub network_protocol: Protocol,
    pub failure_detector: DetectorKind,
    pub consensus: ConsensusKind,
    pub gossipping: bool,
    pub verbose: bool,
    pub initial_value: serde_json::Value,
    pub receive_message_function: Option<UserHandler>,
}

impl Config {
    pub fn new(self_endpoint: Endpoint, neighbors: Vec<Endpoint>) -> Self {
        Self {
            self_endpoint,
            neighbors,
            network_protocol: Protocol::Udp,
            failure_detector: DetectorKind::HeartbeatSlidingWindow,
            consensus: ConsensusKind::ChandraToueg,
            gossipping: false,
            verbose: false,
            initial_value: serde_json::Value::Null,
            receive_message_function: None,
        }
    }
}
