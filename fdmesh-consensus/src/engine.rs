//! Chandra–Toueg rotating-coordinator consensus engine (spec.md §4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use fdmesh_network::{Clock, ConsensusMessage, Endpoint, SystemClock, Transport, codec};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::{coordinator, quorum, sorted_members, Preference};

/// Distributed-agreement engine for one consensus instance per node.
///
/// Owns the round counter, the round-indexed received-message maps, and the
/// working decision value. The node shares its neighbor set with this engine
/// by reference (spec.md §9: "detector and consensus borrow a reference"),
/// so coordinator selection always reflects the node's current membership.
#[derive(Clone)]
pub struct ConsensusEngine {
    self_endpoint: Endpoint,
    clock: Arc<dyn Clock>,
    neighbors: Arc<DashSet<Endpoint>>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    round: Arc<AtomicU64>,
    value: Arc<RwLock<serde_json::Value>>,
    received_preference: Arc<DashMap<u64, Vec<Preference>>>,
    received_positive_ack: Arc<DashMap<u64, usize>>,
    received_negative_ack: Arc<DashMap<u64, usize>>,
    /// Rounds for which this node has already broadcast `CoordinatorPreference`
    /// or `Decide` — guards against re-broadcasting on duplicate acks crossing
    /// quorum again (spec.md §7).
    coordinator_preference_sent: Arc<DashSet<u64>>,
    decide_sent: Arc<DashSet<u64>>,
}

impl ConsensusEngine {
    pub fn new(self_endpoint: Endpoint, neighbors: Arc<DashSet<Endpoint>>, initial_value: serde_json::Value) -> Self {
        Self::with_clock(self_endpoint, neighbors, initial_value, Arc::new(SystemClock))
    }

    pub fn with_clock(
        self_endpoint: Endpoint,
        neighbors: Arc<DashSet<Endpoint>>,
        initial_value: serde_json::Value,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            self_endpoint,
            clock,
            neighbors,
            transport: Arc::new(RwLock::new(None)),
            round: Arc::new(AtomicU64::new(0)),
            value: Arc::new(RwLock::new(initial_value)),
            received_preference: Arc::new(DashMap::new()),
            received_positive_ack: Arc::new(DashMap::new()),
            received_negative_ack: Arc::new(DashMap::new()),
            coordinator_preference_sent: Arc::new(DashSet::new()),
            decide_sent: Arc::new(DashSet::new()),
        }
    }

    pub async fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write().await = Some(transport);
    }

    pub async fn current_value(&self) -> serde_json::Value {
        self.value.read().await.clone()
    }

    pub fn current_round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    fn members(&self) -> Vec<Endpoint> {
        let neighbors: Vec<Endpoint> = self.neighbors.iter().map(|e| e.clone()).collect();
        sorted_members(&self.self_endpoint, &neighbors)
    }

    fn coordinator_for(&self, round: u64) -> Endpoint {
        coordinator(&self.members(), round)
    }

    async fn send_to(&self, msg: ConsensusMessage, to: &Endpoint) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            let wire = fdmesh_network::WireMessage::Consensus(msg);
            match codec::encode(&wire) {
                Ok(bytes) => {
                    if let Err(e) = transport.send(&bytes, to).await {
                        warn!("consensus: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("consensus: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn broadcast(&self, msg: ConsensusMessage) {
        for neighbor in self.members() {
            if neighbor != self.self_endpoint {
                self.send_to(msg.clone(), &neighbor).await;
            }
        }
    }

    fn clear_round_state(&self) {
        self.round.store(0, Ordering::SeqCst);
        self.received_preference.clear();
        self.received_positive_ack.clear();
        self.received_negative_ack.clear();
        self.coordinator_preference_sent.clear();
        self.decide_sent.clear();
    }

    /// Begin (or advance to) the next round and propose the current value.
    pub async fn start_consensus(&self) {
        let round = self.round.fetch_add(1, Ordering::SeqCst) + 1;
        let preference = Preference {
            round,
            preference: self.value.read().await.clone(),
            timestamp: Utc::now(),
            from: self.self_endpoint.clone(),
        };
        let coord = self.coordinator_for(round);
        info!("consensus: round {} starting, coordinator {}", round, coord);
        if coord == self.self_endpoint {
            self.handle_preference(preference).await;
        } else {
            self.send_to(
                ConsensusMessage::Preference {
                    round: preference.round,
                    preference: preference.preference,
                    timestamp: preference.timestamp,
                    from: preference.from,
                },
                &coord,
            )
            .await;
        }
    }

    async fn handle_preference(&self, preference: Preference) {
        let round = preference.round;
        let count = {
            let mut entry = self.received_preference.entry(round).or_insert_with(Vec::new);
            entry.push(preference);
            entry.len()
        };
        let q = quorum(self.members().len());
        if count >= q && self.coordinator_preference_sent.insert(round) {
            let winner = self
                .received_preference
                .get(&round)
                .and_then(|v| v.iter().max_by_key(|p| p.timestamp).cloned())
                .expect("just inserted at least one preference for this round");
            debug!("consensus: round {} reached quorum, winner from {}", round, winner.from);
            let msg = ConsensusMessage::CoordinatorPreference {
                round,
                preference: winner.preference,
                from: self.self_endpoint.clone(),
            };
            self.broadcast(msg.clone()).await;
            self.handle_coordinator_preference(msg).await;
        }
    }

    async fn handle_coordinator_preference(&self, msg: ConsensusMessage) {
        let ConsensusMessage::CoordinatorPreference { round, preference, .. } = msg else { return };
        *self.value.write().await = preference;
        let ack = ConsensusMessage::PositiveAck { round, from: self.self_endpoint.clone() };
        let coord = self.coordinator_for(round);
        if coord == self.self_endpoint {
            self.handle_positive_ack(ack).await;
        } else {
            self.send_to(ack, &coord).await;
        }
    }

    async fn handle_positive_ack(&self, msg: ConsensusMessage) {
        let ConsensusMessage::PositiveAck { round, .. } = msg else { return };
        let count = {
            let mut entry = self.received_positive_ack.entry(round).or_insert(0);
            *entry += 1;
            *entry
        };
        let q = quorum(self.members().len());
        if count >= q && self.decide_sent.insert(round) {
            let winner = self
                .received_preference
                .get(&round)
                .and_then(|v| v.iter().max_by_key(|p| p.timestamp).cloned());
            if let Some(winner) = winner {
                info!("consensus: round {} decided", round);
                let decide = ConsensusMessage::Decide { preference: winner.preference, from: self.self_endpoint.clone() };
                self.broadcast(decide.clone()).await;
                self.handle_decide(decide).await;
            }
        }
    }

    async fn handle_negative_ack(&self, msg: ConsensusMessage) {
        let ConsensusMessage::NegativeAck { round, .. } = msg else { return };
        let count = {
            let mut entry = self.received_negative_ack.entry(round).or_insert(0);
            *entry += 1;
            *entry
        };
        let q = quorum(self.members().len());
        if count >= q {
            warn!("consensus: round {} aborted by negative-ack quorum", round);
            self.clear_round_state();
        }
    }

    async fn handle_decide(&self, msg: ConsensusMessage) {
        let ConsensusMessage::Decide { preference, .. } = msg else { return };
        *self.value.write().await = preference;
        self.clear_round_state();
    }

    /// Called by the node router when a neighbor is believed dead. If that
    /// neighbor was the current round's coordinator, sends it a best-effort
    /// `NegativeAck` and advances to the next round.
    pub async fn on_failure_detected(&self, peer: Endpoint) {
        let round = self.current_round();
        if round > 0 && self.coordinator_for(round) == peer {
            warn!("consensus: coordinator {} of round {} suspected failed", peer, round);
            self.send_to(ConsensusMessage::NegativeAck { round, from: self.self_endpoint.clone() }, &peer).await;
            self.start_consensus().await;
        }
    }

    /// Dispatch an inbound `ConsensusMessage`. Always returns `true`: every
    /// variant is recognized here (the node router only calls this once the
    /// message has already been typed as `ConsensusMessage`).
    pub async fn receive_message(&self, msg: ConsensusMessage) -> bool {
        match msg {
            ConsensusMessage::Preference { round, preference, timestamp, from } => {
                self.handle_preference(Preference { round, preference, timestamp, from }).await;
            }
            msg @ ConsensusMessage::CoordinatorPreference { .. } => {
                self.handle_coordinator_preference(msg).await;
            }
            msg @ ConsensusMessage::PositiveAck { .. } => {
                self.handle_positive_ack(msg).await;
            }
            msg @ ConsensusMessage::NegativeAck { .. } => {
                self.handle_negative_ack(msg).await;
            }
            msg @ ConsensusMessage::Decide { .. } => {
                self.handle_decide(msg).await;
            }
            ConsensusMessage::RequestConsensus { .. } => {
                self.start_consensus().await;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(self_ep: Endpoint, neighbors: Vec<Endpoint>, value: serde_json::Value) -> ConsensusEngine {
        let set = Arc::new(DashSet::new());
        for n in neighbors {
            set.insert(n);
        }
        ConsensusEngine::with_clock(self_ep, set, value, Arc::new(fdmesh_network::ManualClock::new(0)))
    }

    #[tokio::test]
    async fn quorum_of_preferences_triggers_coordinator_preference_once() {
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 2);
        let c = Endpoint::new("c", 3);
        // members sorted: a, b, c => round 1 coordinator is members[1] == b.
        let e = engine(b.clone(), vec![a.clone(), c.clone()], json!("B"));

        let p_a = Preference { round: 1, preference: json!("A"), timestamp: Utc::now(), from: a.clone() };
        let p_c = Preference { round: 1, preference: json!("C"), timestamp: Utc::now(), from: c.clone() };
        e.handle_preference(p_a).await;
        assert!(e.coordinator_preference_sent.is_empty());
        e.handle_preference(p_c).await;
        assert!(e.coordinator_preference_sent.contains(&1));
    }

    #[tokio::test]
    async fn decide_sets_value_and_clears_round_state() {
        let a = Endpoint::new("a", 1);
        let e = engine(a.clone(), vec![], json!(null));
        e.round.store(7, Ordering::SeqCst);
        let decide = ConsensusMessage::Decide { preference: json!("winner"), from: a.clone() };
        e.handle_decide(decide).await;
        assert_eq!(e.current_value().await, json!("winner"));
        assert_eq!(e.current_round(), 0);
    }

    #[tokio::test]
    async fn negative_ack_quorum_clears_state_without_touching_value() {
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 2);
        let c = Endpoint::new("c", 3);
        let e = engine(a.clone(), vec![b.clone(), c.clone()], json!("unchanged"));
        e.round.store(2, Ordering::SeqCst);
        e.handle_negative_ack(ConsensusMessage::NegativeAck { round: 2, from: b.clone() }).await;
        assert_eq!(e.current_round(), 2);
        e.handle_negative_ack(ConsensusMessage::NegativeAck { round: 2, from: c.clone() }).await;
        assert_eq!(e.current_round(), 0);
        assert_eq!(e.current_value().await, json!("unchanged"));
    }

    #[tokio::test]
    async fn on_failure_detected_ignores_non_coordinator_peers() {
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 2);
        let c = Endpoint::new("c", 3);
        let e = engine(a.clone(), vec![b.clone(), c.clone()], json!("v"));
        e.round.store(1, Ordering::SeqCst);
        // members sorted a,b,c -> coordinator(1) = b
        e.on_failure_detected(c.clone()).await;
        assert_eq!(e.current_round(), 1, "failure of a non-coordinator must not advance the round");
    }
}
