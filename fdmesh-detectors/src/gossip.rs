//! Gossip decorator (spec.md §4.3.6): wraps any [`FailureDetector`] and
//! periodically exchanges suspect lists with the neighbor set, so a suspicion
//! raised locally by one node's detector propagates to peers that haven't
//! observed the failure themselves.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use fdmesh_network::{DetectorMessage, Endpoint, Transport, codec};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::detector::{FailureDetector, LearnNeighborFn};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(10_000);

/// Wraps an inner detector `D`, adding periodic suspect-list broadcast and
/// merge on top of whatever failure-detection algorithm `D` implements.
#[derive(Clone)]
pub struct GossipDetector<D: FailureDetector + Clone + 'static> {
    inner: Arc<D>,
    self_endpoint: Endpoint,
    config: DetectorConfig,
    transport: Arc<tokio::sync::RwLock<Option<Arc<dyn Transport>>>>,
    neighbors: Arc<DashSet<Endpoint>>,
}

impl<D: FailureDetector + Clone + 'static> GossipDetector<D> {
    pub fn new(inner: D, self_endpoint: Endpoint, config: DetectorConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            self_endpoint,
            config,
            transport: Arc::new(tokio::sync::RwLock::new(None)),
            neighbors: Arc::new(DashSet::new()),
        }
    }

    async fn send_to(&self, msg: DetectorMessage, to: &Endpoint) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            let wire = fdmesh_network::WireMessage::Detector(msg);
            match codec::encode(&wire) {
                Ok(bytes) => {
                    if let Err(e) = transport.send(&bytes, to).await {
                        warn!("gossip: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("gossip: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn gossip_tick(&self) {
        let suspects = self.inner.get_suspected_list();
        let targets: Vec<Endpoint> = self.neighbors.iter().map(|e| e.clone()).collect();
        for neighbor in targets {
            if self.config.verbose {
                debug!("gossip: broadcasting {} suspects to {}", suspects.len(), neighbor);
            }
            self.send_to(
                DetectorMessage::SendSuspectedList { from: self.self_endpoint.clone(), suspects: suspects.clone() },
                &neighbor,
            )
            .await;
        }
    }
}

#[async_trait]
impl<D: FailureDetector + Clone + 'static> FailureDetector for GossipDetector<D> {
    async fn initialize(
        &self,
        transport: Arc<dyn Transport>,
        neighbors: Vec<Endpoint>,
        on_failure_detected: mpsc::UnboundedSender<Endpoint>,
    ) {
        *self.transport.write().await = Some(transport.clone());
        for n in &neighbors {
            if n != &self.self_endpoint {
                self.neighbors.insert(n.clone());
            }
        }
        self.inner.initialize(transport, neighbors, on_failure_detected).await;
    }

    fn detect_failures(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = self.inner.detect_failures();

        let this = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GOSSIP_INTERVAL);
            loop {
                ticker.tick().await;
                this.gossip_tick().await;
            }
        }));

        handles
    }

    async fn receive_message(&self, msg: &DetectorMessage, learn_neighbor: LearnNeighborFn) -> bool {
        match msg {
            DetectorMessage::SendSuspectedList { from, suspects } => {
                if from != &self.self_endpoint && self.neighbors.insert(from.clone()) {
                    learn_neighbor(from.clone());
                }
                let merged: HashSet<Endpoint> = suspects.iter().cloned().collect();
                self.inner.add_suspects(merged.into_iter().collect());
                true
            }
            other => self.inner.receive_message(other, learn_neighbor).await,
        }
    }

    fn add_neighbor(&self, neighbor: Endpoint) {
        if neighbor != self.self_endpoint {
            self.neighbors.insert(neighbor.clone());
        }
        self.inner.add_neighbor(neighbor);
    }

    fn add_suspects(&self, suspects: Vec<Endpoint>) {
        self.inner.add_suspects(suspects);
    }

    fn get_suspected_list(&self) -> Vec<Endpoint> {
        self.inner.get_suspected_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat_fixed::HeartbeatFixedDetector;

    fn detector() -> GossipDetector<HeartbeatFixedDetector> {
        let inner = HeartbeatFixedDetector::new(Endpoint::new("self", 1), DetectorConfig::default());
        GossipDetector::new(inner, Endpoint::new("self", 1), DetectorConfig::default())
    }

    #[tokio::test]
    async fn merges_suspects_received_from_a_neighbor() {
        let d = detector();
        let peer = Endpoint::new("peer", 2);
        let reported = Endpoint::new("suspect", 3);
        let learn: LearnNeighborFn = Arc::new(|_| {});
        let msg = DetectorMessage::SendSuspectedList { from: peer.clone(), suspects: vec![reported.clone()] };
        assert!(d.receive_message(&msg, learn).await);
        assert!(d.get_suspected_list().contains(&reported));
        assert!(d.neighbors.contains(&peer));
    }

    #[tokio::test]
    async fn delegates_unknown_message_kinds_to_inner_detector() {
        let d = detector();
        let peer = Endpoint::new("peer", 2);
        let learn: LearnNeighborFn = Arc::new(|_| {});
        let msg = DetectorMessage::Heartbeat { from: peer.clone() };
        assert!(d.receive_message(&msg, learn).await);
    }
}
