//! Passive heartbeat detector with a fixed acceptable roundtrip (spec.md
//! §4.3.2).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use fdmesh_network::{Clock, DetectorMessage, Endpoint, SystemClock, Transport, codec};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::detector::{FailureDetector, LearnNeighborFn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2_000);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_millis(4_000);
const ROUNDTRIP_TIME: i64 = 500;

#[derive(Clone)]
pub struct HeartbeatFixedDetector {
    self_endpoint: Endpoint,
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    last_received_heartbeat: Arc<DashMap<Endpoint, i64>>,
    suspected: Arc<DashSet<Endpoint>>,
    on_failure: Arc<RwLock<Option<mpsc::UnboundedSender<Endpoint>>>>,
}

impl HeartbeatFixedDetector {
    pub fn new(self_endpoint: Endpoint, config: DetectorConfig) -> Self {
        Self::with_clock(self_endpoint, config, Arc::new(SystemClock))
    }

    pub fn with_clock(self_endpoint: Endpoint, config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            self_endpoint,
            config,
            clock,
            transport: Arc::new(RwLock::new(None)),
            last_received_heartbeat: Arc::new(DashMap::new()),
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
                        warn!("heartbeat-fixed: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("heartbeat-fixed: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn fire_failure(&self, peer: Endpoint) {
        info!("heartbeat-fixed: {} suspected failed", peer);
        if let Some(sender) = self.on_failure.read().await.as_ref() {
            let _ = sender.send(peer);
        }
    }

    async fn report_health_tick(&self) {
        let targets: Vec<Endpoint> = self
            .last_received_heartbeat
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| !self.suspected.contains(n))
            .collect();
        for neighbor in targets {
            if self.config.verbose {
                debug!("heartbeat-fixed: beating to {}", neighbor);
            }
            self.send_to(DetectorMessage::Heartbeat { from: self.self_endpoint.clone() }, &neighbor).await;
        }
    }

    async fn detect_failures_tick(&self) {
        let now = self.clock.now_millis();
        let snapshot: Vec<(Endpoint, i64)> =
            self.last_received_heartbeat.iter().map(|e| (e.key().clone(), *e.value())).collect();
        for (neighbor, last) in snapshot {
            let was_suspected = self.suspected.contains(&neighbor);
            if now - last > ROUNDTRIP_TIME + HEARTBEAT_INTERVAL.as_millis() as i64 {
                let newly_suspected = self.suspected.insert(neighbor.clone());
                if newly_suspected {
                    self.fire_failure(neighbor).await;
                }
            } else if was_suspected {
                self.suspected.remove(&neighbor);
                info!("heartbeat-fixed: {} recovered", neighbor);
            }
        }
    }
}

#[async_trait]
impl FailureDetector for HeartbeatFixedDetector {
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
                self.last_received_heartbeat.entry(n).or_insert(now);
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
                if from != &self.self_endpoint && !self.last_received_heartbeat.contains_key(from) {
                    learn_neighbor(from.clone());
                }
                self.last_received_heartbeat.insert(from.clone(), self.clock.now_millis());
                self.suspected.remove(from);
                true
            }
            _ => false,
        }
    }

    fn add_neighbor(&self, neighbor: Endpoint) {
        if neighbor != self.self_endpoint {
            let now = self.clock.now_millis();
            self.last_received_heartbeat.entry(neighbor).or_insert(now);
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

    fn detector_at(now: i64) -> (HeartbeatFixedDetector, Arc<fdmesh_network::ManualClock>) {
        let clock = Arc::new(fdmesh_network::ManualClock::new(now));
        let d = HeartbeatFixedDetector::with_clock(Endpoint::new("self", 1), DetectorConfig::default(), clock.clone());
        (d, clock)
    }

    #[tokio::test]
    async fn does_not_convict_at_exactly_2500ms_gap() {
        let (d, clock) = detector_at(2_500);
        let peer = Endpoint::new("peer", 2);
        d.last_received_heartbeat.insert(peer.clone(), 0);
        d.detect_failures_tick().await;
        assert!(!d.get_suspected_list().contains(&peer));

        clock.advance(1);
        d.detect_failures_tick().await;
        assert!(d.get_suspected_list().contains(&peer), "2501ms must convict");
    }

    #[tokio::test]
    async fn recovers_on_heartbeat_after_conviction() {
        let (d, _clock) = detector_at(10_000);
        let peer = Endpoint::new("peer", 2);
        d.last_received_heartbeat.insert(peer.clone(), 0);
        d.detect_failures_tick().await;
        assert!(d.get_suspected_list().contains(&peer));

        let learn: LearnNeighborFn = Arc::new(|_| {});
        let msg = DetectorMessage::Heartbeat { from: peer.clone() };
        assert!(d.receive_message(&msg, learn).await);
        assert!(!d.get_suspected_list().contains(&peer));
    }
}
