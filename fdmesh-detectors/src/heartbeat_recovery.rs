//! Heartbeat detector with recovery-adjusted roundtrip (spec.md §4.3.3): the
//! per-peer acceptable roundtrip grows to match the silence observed across
//! each recovery, rather than staying fixed at 500ms forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fdmesh_network::{Clock, DetectorMessage, Endpoint, SystemClock, Transport, codec};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::detector::{FailureDetector, LearnNeighborFn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2_000);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_millis(4_000);
const INITIAL_ROUNDTRIP_TIME: i64 = 500;

#[derive(Debug, Clone, Copy)]
struct PeerHealth {
    last_received_heartbeat: i64,
    roundtrip_time: i64,
}

#[derive(Clone)]
pub struct HeartbeatRecoveryDetector {
    self_endpoint: Endpoint,
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    health: Arc<DashMap<Endpoint, PeerHealth>>,
    /// Maps a suspected peer to the `last_received_heartbeat` value recorded
    /// at the moment of conviction, so the recovery math in spec.md §4.3.3
    /// can measure the full silent gap once a heartbeat finally arrives.
    suspected: Arc<DashMap<Endpoint, i64>>,
    on_failure: Arc<RwLock<Option<mpsc::UnboundedSender<Endpoint>>>>,
}

impl HeartbeatRecoveryDetector {
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
            suspected: Arc::new(DashMap::new()),
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
                        warn!("heartbeat-recovery: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("heartbeat-recovery: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn fire_failure(&self, peer: Endpoint) {
        info!("heartbeat-recovery: {} suspected failed", peer);
        if let Some(sender) = self.on_failure.read().await.as_ref() {
            let _ = sender.send(peer);
        }
    }

    async fn report_health_tick(&self) {
        let targets: Vec<Endpoint> = self
            .health
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| !self.suspected.contains_key(n))
            .collect();
        for neighbor in targets {
            if self.config.verbose {
                debug!("heartbeat-recovery: beating to {}", neighbor);
            }
            self.send_to(DetectorMessage::Heartbeat { from: self.self_endpoint.clone() }, &neighbor).await;
        }
    }

    async fn detect_failures_tick(&self) {
        let now = self.clock.now_millis();
        let snapshot: Vec<(Endpoint, PeerHealth)> =
            self.health.iter().map(|e| (e.key().clone(), *e.value())).collect();
        for (neighbor, health) in snapshot {
            if self.suspected.contains_key(&neighbor) {
                continue;
            }
            if now - health.last_received_heartbeat > health.roundtrip_time + HEARTBEAT_INTERVAL.as_millis() as i64 {
                self.suspected.insert(neighbor.clone(), health.last_received_heartbeat);
                self.fire_failure(neighbor).await;
            }
        }
    }
}

#[async_trait]
impl FailureDetector for HeartbeatRecoveryDetector {
    async fn initialize(
        &self,
        transport: Arc<dyn Transport>,
        neighbors: Vec<Endpoint>,
        on_failure_detected: mpsc::UnboundedSender<Endpoint>,
    ) {
        *self.transport.write().await = Some(transport);
        *self.on_failure.write().await = Some(on_failure_detected);
        let now = self.clock.now_millis();
        for n in neighbors {
            if n != self.self_endpoint {
                self.health.entry(n).or_insert(PeerHealth {
                    last_received_heartbeat: now,
                    roundtrip_time: INITIAL_ROUNDTRIP_TIME,
                });
            }
        }
    }

    fn detect_failures(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let this = self.clone();
        let report = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
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
            DetectorMessage::Heartbeat { from } => {
                if from != &self.self_endpoint && !self.health.contains_key(from) {
                    learn_neighbor(from.clone());
                }
                let now = self.clock.now_millis();
                if let Some((_, conviction_heartbeat)) = self.suspected.remove(from) {
                    let new_roundtrip = now - conviction_heartbeat;
                    self.health.entry(from.clone()).and_modify(|h| {
                        h.roundtrip_time = new_roundtrip;
                        h.last_received_heartbeat = now;
                    });
                    info!("heartbeat-recovery: {} recovered, roundtrip now {}ms", from, new_roundtrip);
                } else {
                    self.health
                        .entry(from.clone())
                        .and_modify(|h| h.last_received_heartbeat = now)
                        .or_insert(PeerHealth { last_received_heartbeat: now, roundtrip_time: INITIAL_ROUNDTRIP_TIME });
                }
                true
            }
            _ => false,
        }
    }

    fn add_neighbor(&self, neighbor: Endpoint) {
        if neighbor != self.self_endpoint {
            let now = self.clock.now_millis();
            self.health
                .entry(neighbor)
                .or_insert(PeerHealth { last_received_heartbeat: now, roundtrip_time: INITIAL_ROUNDTRIP_TIME });
        }
    }

    fn add_suspects(&self, suspects: Vec<Endpoint>) {
        let now = self.clock.now_millis();
        for s in suspects {
            if s != self.self_endpoint {
                self.suspected.entry(s).or_insert(now);
            }
        }
    }

    fn get_suspected_list(&self) -> Vec<Endpoint> {
        self.suspected.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recovery_installs_observed_silence_as_new_roundtrip() {
        let clock = Arc::new(fdmesh_network::ManualClock::new(0));
        let d = HeartbeatRecoveryDetector::with_clock(Endpoint::new("self", 1), DetectorConfig::default(), clock.clone());
        let peer = Endpoint::new("peer", 2);
        d.health.insert(peer.clone(), PeerHealth { last_received_heartbeat: 0, roundtrip_time: INITIAL_ROUNDTRIP_TIME });

        clock.set(3_000);
        d.detect_failures_tick().await;
        assert!(d.get_suspected_list().contains(&peer));

        clock.set(9_000);
        let learn: LearnNeighborFn = Arc::new(|_| {});
        let msg = DetectorMessage::Heartbeat { from: peer.clone() };
        assert!(d.receive_message(&msg, learn).await);

        assert!(!d.get_suspected_list().contains(&peer));
        assert_eq!(d.health.get(&peer).unwrap().roundtrip_time, 9_000);
    }
}
