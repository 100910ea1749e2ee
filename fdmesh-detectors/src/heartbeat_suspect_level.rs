//! Heartbeat detector with a soft "suspect level" counter (spec.md §4.3.5).
//! Uses the same sliding-window acceptable-roundtrip math as §4.3.4, plus a
//! per-peer integer suspect level that must miss `suspectLevelMaximum`
//! consecutive windows before the peer is promoted to hard-suspected. This
//! is the detector that maps most directly onto an eventually-strong
//! failure detector.

use std::collections::VecDeque;
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
const SLIDING_WINDOW_SIZE: usize = 50;
const INITIAL_SAMPLE: i64 = 2_000;
const SUSPECT_LEVEL_MAXIMUM: u32 = 3;

#[derive(Debug, Clone)]
struct PeerHealth {
    last_received_heartbeat: i64,
    samples: VecDeque<i64>,
}

impl Default for PeerHealth {
    fn default() -> Self {
        let mut samples = VecDeque::with_capacity(SLIDING_WINDOW_SIZE);
        samples.push_front(INITIAL_SAMPLE);
        Self { last_received_heartbeat: 0, samples }
    }
}

impl PeerHealth {
    fn acceptable_roundtrip(&self) -> f64 {
        let n = self.samples.len().min(SLIDING_WINDOW_SIZE);
        let sum: i64 = self.samples.iter().take(n).sum();
        sum as f64 / n as f64
    }

    fn record_sample(&mut self, sample: i64, now: i64) {
        self.samples.push_front(sample);
        self.samples.truncate(SLIDING_WINDOW_SIZE);
        self.last_received_heartbeat = now;
    }
}

#[derive(Clone)]
pub struct HeartbeatSuspectLevelDetector {
    self_endpoint: Endpoint,
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    health: Arc<DashMap<Endpoint, PeerHealth>>,
    /// Guarded with its own reader-writer lock per spec.md §4.3.5, separate
    /// from the `DashMap`'s per-shard lock used for `health`.
    suspect_level: Arc<DashMap<Endpoint, Arc<RwLock<u32>>>>,
    suspected: Arc<DashMap<Endpoint, i64>>,
    on_failure: Arc<RwLock<Option<mpsc::UnboundedSender<Endpoint>>>>,
}

impl HeartbeatSuspectLevelDetector {
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
            suspect_level: Arc::new(DashMap::new()),
            suspected: Arc::new(DashMap::new()),
            on_failure: Arc::new(RwLock::new(None)),
        }
    }

    fn level_lock(&self, peer: &Endpoint) -> Arc<RwLock<u32>> {
        self.suspect_level.entry(peer.clone()).or_insert_with(|| Arc::new(RwLock::new(0))).clone()
    }

    /// Current suspect level for `peer`, 0 if never tracked.
    pub async fn suspect_level_of(&self, peer: &Endpoint) -> u32 {
        match self.suspect_level.get(peer) {
            Some(lock) => *lock.value().read().await,
            None => 0,
        }
    }

    async fn send_to(&self, msg: DetectorMessage, to: &Endpoint) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            let wire = fdmesh_network::WireMessage::Detector(msg);
            match codec::encode(&wire) {
                Ok(bytes) => {
                    if let Err(e) = transport.send(&bytes, to).await {
                        warn!("heartbeat-suspect-level: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("heartbeat-suspect-level: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn fire_failure(&self, peer: Endpoint) {
        info!("heartbeat-suspect-level: {} promoted to hard-suspected", peer);
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
                debug!("heartbeat-suspect-level: beating to {}", neighbor);
            }
            self.send_to(DetectorMessage::Heartbeat { from: self.self_endpoint.clone() }, &neighbor).await;
        }
    }

    async fn detect_failures_tick(&self) {
        let now = self.clock.now_millis();
        let snapshot: Vec<(Endpoint, i64, f64)> = self
            .health
            .iter()
            .filter(|e| !self.suspected.contains_key(e.key()))
            .map(|e| (e.key().clone(), e.value().last_received_heartbeat, e.value().acceptable_roundtrip()))
            .collect();
        for (neighbor, last, acceptable) in snapshot {
            let gap = (now - last) as f64;
            let n = (gap / acceptable).floor() as i64;
            if n > 0 {
                let lock = self.level_lock(&neighbor);
                *lock.write().await = n as u32;
                if n as u32 >= SUSPECT_LEVEL_MAXIMUM {
                    self.suspected.insert(neighbor.clone(), last);
                    self.fire_failure(neighbor).await;
                }
            }
        }
    }
}

#[async_trait]
impl FailureDetector for HeartbeatSuspectLevelDetector {
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
                self.health.entry(n.clone()).or_insert_with(|| PeerHealth { last_received_heartbeat: now, ..PeerHealth::default() });
                self.level_lock(&n);
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
                    let sample = now - conviction_heartbeat;
                    self.health.entry(from.clone()).and_modify(|h| h.record_sample(sample, now)).or_insert_with(|| {
                        let mut h = PeerHealth::default();
                        h.record_sample(sample, now);
                        h
                    });
                } else {
                    self.health
                        .entry(from.clone())
                        .and_modify(|h| {
                            let sample = now - h.last_received_heartbeat;
                            h.record_sample(sample, now);
                        })
                        .or_insert_with(|| PeerHealth { last_received_heartbeat: now, ..PeerHealth::default() });
                }
                // Reduce suspicion exactly once per inbound heartbeat.
                let lock = self.level_lock(from);
                let mut level = lock.write().await;
                *level = level.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    fn add_neighbor(&self, neighbor: Endpoint) {
        if neighbor != self.self_endpoint {
            let now = self.clock.now_millis();
            self.health.entry(neighbor.clone()).or_insert_with(|| PeerHealth { last_received_heartbeat: now, ..PeerHealth::default() });
            self.level_lock(&neighbor);
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
    async fn two_consecutive_reduce_suspicion_calls_at_zero_stay_at_zero() {
        let clock = Arc::new(fdmesh_network::ManualClock::new(0));
        let d = HeartbeatSuspectLevelDetector::with_clock(Endpoint::new("self", 1), DetectorConfig::default(), clock);
        let peer = Endpoint::new("peer", 2);
        d.add_neighbor(peer.clone());
        let learn: LearnNeighborFn = Arc::new(|_| {});
        let msg = DetectorMessage::Heartbeat { from: peer.clone() };
        d.receive_message(&msg, learn.clone()).await;
        d.receive_message(&msg, learn).await;
        assert_eq!(d.suspect_level_of(&peer).await, 0);
    }

    #[tokio::test]
    async fn requires_three_missed_windows_to_convict() {
        let clock = Arc::new(fdmesh_network::ManualClock::new(0));
        let d = HeartbeatSuspectLevelDetector::with_clock(Endpoint::new("self", 1), DetectorConfig::default(), clock.clone());
        let peer = Endpoint::new("peer", 2);
        d.add_neighbor(peer.clone());

        clock.set(3_500); // floor(3500/2000) == 1
        d.detect_failures_tick().await;
        assert_eq!(d.suspect_level_of(&peer).await, 1);
        assert!(!d.get_suspected_list().contains(&peer));

        clock.set(6_500); // floor(6500/2000) == 3
        d.detect_failures_tick().await;
        assert_eq!(d.suspect_level_of(&peer).await, 3);
        assert!(d.get_suspected_list().contains(&peer));
    }
}
