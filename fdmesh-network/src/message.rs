//! Wire message types shared by every protocol that rides over a
//! [`crate::transport::Transport`].
//!
//! Per spec.md §4.2 and the design notes in §9, every message that crosses the
//! wire is a variant of one tagged union so the receiver can reliably
//! discriminate concrete kind after decoding. `WireMessage` is that union: it
//! nests the failure-detector messages and the consensus messages as their own
//! sub-enums (so `fdmesh-detectors` and `fdmesh-consensus` each only need to
//! know about their own variants) plus a `User` escape hatch for
//! application-defined payloads the node router passes straight through to
//! the user's handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::Endpoint;

/// Top-level discriminated union for everything that can cross the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    Detector(DetectorMessage),
    Consensus(ConsensusMessage),
    User(serde_json::Value),
}

/// Messages understood by the failure-detector family (ping-ack, the
/// heartbeat variants, and the gossip decorator).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DetectorMessage {
    Ping { message_id: Uuid, from: Endpoint },
    Ack { message_id: Uuid, in_response_to: Uuid, from: Endpoint },
    Heartbeat { from: Endpoint },
    SendSuspectedList { from: Endpoint, suspects: Vec<Endpoint> },
}

/// Messages understood by the Chandra–Toueg consensus engine (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ConsensusMessage {
    Preference {
        round: u64,
        preference: serde_json::Value,
        timestamp: DateTime<Utc>,
        from: Endpoint,
    },
    CoordinatorPreference {
        round: u64,
        preference: serde_json::Value,
        from: Endpoint,
    },
    PositiveAck {
        round: u64,
        from: Endpoint,
    },
    NegativeAck {
        round: u64,
        from: Endpoint,
    },
    Decide {
        preference: serde_json::Value,
        from: Endpoint,
    },
    RequestConsensus {
        from: Endpoint,
    },
}
