//! Heartbeat detector whose acceptable roundtrip is the mean of the last W
//! measured roundtrips (spec.md §4.3.4).

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

#[derive(Debug, Clone)]
pub(crate) struct PeerHealth {
    pub(crate) last_received_heartbeat: i64,
    /// Most-recent-first roundtrip samples.
    pub(crate) samples: VecDeque<i64>,
}

impl Default for PeerHealth {
    fn default() -> Self {
        let mut samples = VecDeque::with_capacity(SLIDING_WINDOW_SIZE);
        samples.push_front(INITIAL_SAMPLE);
        Self { last_received_heartbeat: 0, samples }
    }
}

impl PeerHealth {
    pub(crate) fn acceptable_roundtrip(&self) -> f64 {
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
pub struct HeartbeatSlidingWindowDetector {
    self_endpoint: Endpoint,
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    pub(crate) health: Arc<DashMap<Endpoint, PeerHealth>>,
    /// Suspected peer -> `last_received_heartbeat` value at conviction time,
    /// used to compute the silence sample once recovery happens.
    pub(crate) suspected: Arc<DashMap<Endpoint, i64>>,
    on_failure: Arc<RwLock<Option<mpsc::UnboundedSender<Endpoint>>>>,
}

impl HeartbeatSlidingWindowDetector {
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
                        warn!("heartbeat-sliding: send to {} failed: {}", to, e);
                    }
                }
                Err(e) => warn!("heartbeat-sliding: failed to encode message for {}: {}", to, e),
            }
        }
    }

    async fn fire_failure(&self, peer: Endpoint) {
        info!("heartbeat-sliding: {} suspected failed", peer);
        if let Some(sender) = self.on_failure.read().await.as_ref() {
            let _ = sender.send(peer);
        }
    }

    pub(crate) async fn report_health_tick(&self) {
        let targets: Vec<Endpoint> = self
            .health
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| !self.suspected.contains_key(n))
            .collect();
        for neighbor in targets {
            if self.config.verbose {
                debug!("heartbeat-sliding: beating to {}", neighbor);
            }
            self.send_to(DetectorMessage::Heartbeat { from: self.self_endpoint.clone() }, &neighbor).await;
        }
    }

    pub(crate) async fn detect_failures_tick(&self) {
        let now = self.clock.now_millis();
        let snapshot: Vec<(Endpoint, i64, f64)> = self
            .health
            .iter()
            .filter(|e| !self.suspected.contains_key(e.key()))
            .map(|e| (e.key().clone(), e.value().last_received_heartbeat, e.value().acceptable_roundtrip()))
            .collect();
        for (neighbor, last, acceptable) in snapshot {
            if (now - last) as f64 > acceptable + HEARTBEAT_INTERVAL.as_millis() as f64 {
                self.suspected.insert(neighbor.clone(), last);
                self.fire_failure(neighbor).await;
            }
        }
    }
}

#[async_trait]
impl FailureDetector for HeartbeatSlidingWindowDetector {
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
                self.health.entry(n).or_insert_with(|| PeerHealth { last_received_heartbeat: now, ..PeerHealth::default() });
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
                true
            }
            _ => false,
        }
    }

    fn add_neighbor(&self, neighbor: Endpoint) {
        if neighbor != self.self_endpoint {
            let now = self.clock.now_millis();
            self.health.entry(neighbor).or_insert_with(|| PeerHealth { last_received_heartbeat: now, ..PeerHealth::default() });
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
