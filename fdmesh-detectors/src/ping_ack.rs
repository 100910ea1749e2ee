//! Active-probe detector with a fixed tolerance window (spec.md §4.3.1).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use fdmesh_network::{Clock, DetectorMessage, Endpoint, SystemClock, Transport, codec};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DetectorConfig;
use crate::detector::{FailureDetector, LearnNeighborFn};

const PING_INTERVAL: Duration = Duration::from_millis(4_000);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_millis(6_000);
const TOLERATE_FAILURE_FOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, Default)]
struct PeerHealth {
    last_sent_ping: i64,
    last_received_ack: i64,
}

#[derive(Clone)]
pub struct PingAckDetector {
    self_endpoint: Endpoint,
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    health: Arc<DashMap<Endpoint, PeerHealth>>,
    suspected: Arc<DashSet<Endpoint>>,
    on_failure: Arc<RwLock<Option<mpsc::UnboundedSender<Endpoint>>>>,
}

impl PingAckDetector {
    pub fn new(self_endpoint: Endpoint, config: DetectorConfig) -> Self {
        Self::with_clock(self_endpoint, config, Arc::new(SystemClock))
    }

    pub fn with_clock(self_endpoint: Endpoint, config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            self_endpoint,
            config,
            clock,
            transport: Arc::new(RwLock::new(None)),
            health: Arc::new(DashMap::new()),
            suspected: Arc::new(DashSet::new()),
            on_failure: Arc::new(RwLock::new(None)),
        }
    }

    async fn send_to(&self, msg: DetectorMessage, to: &Endpoint) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            let wire = fdmesh_network::WireMessage::Detector(msg);
            match codec::encode(&wire) {
                Ok(bytes) => {
                    if let Err(e) = transport.send(&bytes, to).await {
                        warn!("ping-ack: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("ping-ack: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn fire_failure(&self, peer: Endpoint) {
        info!("ping-ack: {} suspected failed", peer);
        if let Some(sender) = self.on_failure.read().await.as_ref() {
            let _ = sender.send(peer);
        }
    }

    async fn report_health_tick(&self) {
        let targets: Vec<Endpoint> = self
            .health
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| !self.suspected.contains(n))
            .collect();
        for neighbor in targets {
            let message_id = Uuid::new_v4();
            self.health.entry(neighbor.clone()).and_modify(|h| {
                h.last_sent_ping = self.clock.now_millis();
            });
            if self.config.verbose {
                debug!("ping-ack: pinging {}", neighbor);
            }
            self.send_to(
                DetectorMessage::Ping { message_id, from: self.self_endpoint.clone() },
                &neighbor,
            )
            .await;
        }
    }

    async fn detect_failures_tick(&self) {
        let snapshot: Vec<(Endpoint, PeerHealth)> =
            self.health.iter().map(|e| (e.key().clone(), *e.value())).collect();
        for (neighbor, health) in snapshot {
            if health.last_received_ack == 0 {
                // No ack since the first ping; the source's `abs()` wrap is
                // ambiguous here (spec.md §9) — treated explicitly as
                // "not yet suspected" rather than convicting on a stale zero.
                continue;
            }
            let gap = (health.last_received_ack - health.last_sent_ping).abs();
            let was_suspected = self.suspected.contains(&neighbor);
            if gap > TOLERATE_FAILURE_FOR {
                let newly_suspected = self.suspected.insert(neighbor.clone());
                if newly_suspected {
                    self.fire_failure(neighbor).await;
                }
            } else if was_suspected {
                self.suspected.remove(&neighbor);
                info!("ping-ack: {} recovered", neighbor);
            }
        }
    }
}

#[async_trait]
impl FailureDetector for PingAckDetector {
    async fn initialize(
        &self,
        transport: Arc<dyn Transport>,
        neighbors: Vec<Endpoint>,
        on_failure_detected: mpsc::UnboundedSender<Endpoint>,
    ) {
        *self.transport.write().await = Some(transport);
        *self.on_failure.write().await = Some(on_failure_detected);
        for n in neighbors {
            if n != self.self_endpoint {
                self.health.entry(n).or_insert_with(PeerHealth::default);
            }
        }
    }

    fn detect_failures(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let this = self.clone();
        let report = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            loop {
                ticker.tick().await;
                this.report_health_tick().await;
            }
        });

        let this = self.clone();
        let detect = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FAILURE_DETECTION_INTERVAL);
            loop {
                ticker.tick().await;
                this.detect_failures_tick().await;
            }
        });

        vec![report, detect]
    }

    async fn receive_message(&self, msg: &DetectorMessage, learn_neighbor: LearnNeighborFn) -> bool {
        match msg {
            DetectorMessage::Ping { message_id, from } => {
                if from != &self.self_endpoint && !self.health.contains_key(from) {
                    learn_neighbor(from.clone());
                }
                self.suspected.remove(from);
                self.send_to(
                    DetectorMessage::Ack {
                        message_id: Uuid::new_v4(),
                        in_response_to: *message_id,
                        from: self.self_endpoint.clone(),
                    },
                    from,
                )
                .await;
                true
            }
            DetectorMessage::Ack { from, .. } => {
                if from != &self.self_endpoint && !self.health.contains_key(from) {
                    learn_neighbor(from.clone());
                }
                self.health.entry(from.clone()).or_insert_with(PeerHealth::default).last_received_ack =
                    self.clock.now_millis();
                self.suspected.remove(from);
                true
            }
            _ => false,
        }
    }

    fn add_neighbor(&self, neighbor: Endpoint) {
        if neighbor != self.self_endpoint {
            self.health.entry(neighbor).or_insert_with(PeerHealth::default);
        }
    }

    fn add_suspects(&self, suspects: Vec<Endpoint>) {
        for s in suspects {
            if s != self.self_endpoint {
                self.suspected.insert(s);
            }
        }
    }

    fn get_suspected_list(&self) -> Vec<Endpoint> {
        self.suspected.iter().map(|e| e.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PingAckDetector {
        PingAckDetector::with_clock(
            Endpoint::new("self", 1),
            DetectorConfig::default(),
            Arc::new(fdmesh_network::ManualClock::new(0)),
        )
    }

    #[tokio::test]
    async fn convicts_iff_gap_exceeds_tolerance() {
        let d = detector();
        let peer = Endpoint::new("peer", 2);
        d.health.insert(peer.clone(), PeerHealth { last_sent_ping: 0, last_received_ack: 10_000 });
        d.detect_failures_tick().await;
        assert!(!d.get_suspected_list().contains(&peer), "exactly at tolerance must not convict");

        d.health.insert(peer.clone(), PeerHealth { last_sent_ping: 0, last_received_ack: 10_001 });
        d.detect_failures_tick().await;
        assert!(d.get_suspected_list().contains(&peer), "over tolerance must convict");
    }

    #[tokio::test]
    async fn zero_ack_is_not_yet_suspected() {
        let d = detector();
        let peer = Endpoint::new("peer", 2);
        d.health.insert(peer.clone(), PeerHealth { last_sent_ping: 999_999, last_received_ack: 0 });
        d.detect_failures_tick().await;
        assert!(!d.get_suspected_list().contains(&peer));
    }

    #[tokio::test]
    async fn fires_upcall_only_on_transition() {
        let d = detector();
        let peer = Endpoint::new("peer", 2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        *d.on_failure.write().await = Some(tx);
        d.health.insert(peer.clone(), PeerHealth { last_sent_ping: 0, last_received_ack: 20_000 });
        d.detect_failures_tick().await;
        d.detect_failures_tick().await;
        assert_eq!(rx.try_recv().unwrap(), peer);
        assert!(rx.try_recv().is_err(), "must not re-fire while still suspected");
    }
}
