//! Node router (spec.md §4.5): owns the transport, the neighbor set, the
//! selected failure detector, and the consensus engine, and dispatches every
//! inbound frame to whichever of them understands it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use fdmesh_consensus::ConsensusEngine;
use fdmesh_detectors::{
    DetectorConfig, FailureDetector, GossipDetector, HeartbeatFixedDetector, HeartbeatRecoveryDetector,
    HeartbeatSlidingWindowDetector, HeartbeatSuspectLevelDetector, LearnNeighborFn, PingAckDetector,
};
use fdmesh_network::{codec, tcp::TcpTransport, udp::UdpTransport, Endpoint, Transport, WireMessage};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{Config, DetectorKind, Protocol};

/// Warm-up delay before a freshly started node proposes its own value, to
/// give the transport and the other nodes time to come up (spec.md §4.5:
/// "optionally schedules an initial startConsensus() after a warm-up delay").
const CONSENSUS_WARMUP: Duration = Duration::from_millis(1_000);

fn build_detector(kind: DetectorKind, self_endpoint: Endpoint, config: DetectorConfig, gossip: bool) -> Arc<dyn FailureDetector> {
    macro_rules! maybe_gossip {
        ($inner:expr) => {
            if gossip {
                Arc::new(GossipDetector::new($inner, self_endpoint.clone(), config))
            } else {
                Arc::new($inner)
            }
        };
    }
    match kind {
        DetectorKind::PingAck => maybe_gossip!(PingAckDetector::new(self_endpoint.clone(), config)),
        DetectorKind::SimpleHeartbeat => maybe_gossip!(HeartbeatFixedDetector::new(self_endpoint.clone(), config)),
        DetectorKind::HeartbeatRecovery => maybe_gossip!(HeartbeatRecoveryDetector::new(self_endpoint.clone(), config)),
        DetectorKind::HeartbeatSlidingWindow => maybe_gossip!(HeartbeatSlidingWindowDetector::new(self_endpoint.clone(), config)),
        DetectorKind::HeartbeatSuspectLevel => maybe_gossip!(HeartbeatSuspectLevelDetector::new(self_endpoint.clone(), config)),
    }
}

/// A running peer in the mesh. Cheap to clone: every field is `Arc`-backed so
/// the same `Node` can be captured by the transport's receive-loop closure
/// and by the periodic background tasks it spawns.
#[derive(Clone)]
pub struct Node {
    self_endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    neighbors: Arc<DashSet<Endpoint>>,
    detector: Arc<dyn FailureDetector>,
    consensus: Arc<ConsensusEngine>,
    user_handler: Option<crate::config::UserHandler>,
}

impl Node {
    /// Bind the configured transport and wire together the detector,
    /// consensus engine, and neighbor set. Does not start any background
    /// task yet — call [`Node::run`] for that.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let transport: Arc<dyn Transport> = match config.network_protocol {
            Protocol::Udp => Arc::new(UdpTransport::bind(config.self_endpoint.clone()).await?),
            Protocol::Tcp => Arc::new(TcpTransport::bind(config.self_endpoint.clone()).await?),
        };

        let neighbors = Arc::new(DashSet::new());
        for n in &config.neighbors {
            if n != &config.self_endpoint {
                neighbors.insert(n.clone());
            }
        }

        let detector_config = DetectorConfig { verbose: config.verbose };
        let detector = build_detector(config.failure_detector, config.self_endpoint.clone(), detector_config, config.gossipping);

        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel();
        detector.initialize(transport.clone(), config.neighbors.clone(), failure_tx).await;

        let consensus = Arc::new(ConsensusEngine::new(config.self_endpoint.clone(), neighbors.clone(), config.initial_value.clone()));
        consensus.set_transport(transport.clone()).await;

        let node = Self {
            self_endpoint: config.self_endpoint.clone(),
            transport,
            neighbors,
            detector,
            consensus,
            user_handler: config.receive_message_function.clone(),
        };

        let consensus_for_failures = node.consensus.clone();
        tokio::spawn(async move {
            while let Some(peer) = failure_rx.recv().await {
                consensus_for_failures.on_failure_detected(peer).await;
            }
        });

        Ok(node)
    }

    fn learn_neighbor_fn(&self) -> LearnNeighborFn {
        let neighbors = self.neighbors.clone();
        let detector = self.detector.clone();
        let self_endpoint = self.self_endpoint.clone();
        Arc::new(move |n: Endpoint| {
            if n != self_endpoint && neighbors.insert(n.clone()) {
                info!("learned new neighbor {}", n);
                detector.add_neighbor(n);
            }
        })
    }

    /// Decode `bytes` and dispatch to whichever subsystem understands it
    /// (spec.md §4.5). Detector and consensus messages are already
    /// discriminated by the wire tag (spec.md §9's "tagged variants" design
    /// note), so unlike the source's runtime type-test chain, dispatch here
    /// is a direct match rather than a try-each-handler-in-turn loop.
    pub async fn route(&self, bytes: Vec<u8>) {
        let message = match codec::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping undecodable frame: {}", e);
                return;
            }
        };
        match message {
            WireMessage::Detector(msg) => {
                let handled = self.detector.receive_message(&msg, self.learn_neighbor_fn()).await;
                if !handled {
                    warn!("detector did not recognize message {:?}", msg);
                }
            }
            WireMessage::Consensus(msg) => {
                self.consensus.receive_message(msg).await;
            }
            WireMessage::User(value) => {
                if let Some(handler) = &self.user_handler {
                    handler(value);
                }
            }
        }
    }

    /// Trigger a consensus round directly (spec.md §10: exposes
    /// `RequestConsensus` as a first-class operation rather than leaving it
    /// theoretical).
    pub async fn request_consensus(&self) {
        self.consensus.start_consensus().await;
    }

    pub fn add_neighbor(&self, neighbor: Endpoint) {
        (self.learn_neighbor_fn())(neighbor);
    }

    /// The detector's current suspect set (spec.md §4.3's `getSuspectedList`).
    pub fn suspected_list(&self) -> Vec<Endpoint> {
        self.detector.get_suspected_list()
    }

    /// The consensus engine's current decided (or proposed) value.
    pub async fn current_value(&self) -> serde_json::Value {
        self.consensus.current_value().await
    }

    /// The consensus engine's current round number (0 before any round starts).
    pub fn current_round(&self) -> u64 {
        self.consensus.current_round()
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.self_endpoint
    }

    /// Launch the receive loop, the detector's background workflows, and
    /// (after a warm-up delay) the first consensus round, all as long-lived
    /// background tasks. Returns once every task is launched; the tasks
    /// themselves run for the lifetime of the returned handle.
    pub fn start(&self) -> NodeHandle {
        let this = self.clone();
        let receive_task = tokio::spawn(async move {
            let this = this;
            let handler = {
                let this = this.clone();
                Arc::new(move |bytes: Vec<u8>| {
                    let this = this.clone();
                    tokio::spawn(async move {
                        this.route(bytes).await;
                    });
                })
            };
            if let Err(e) = this.transport.receive_loop(handler).await {
                error!("transport receive loop exited: {}", e);
            }
        });

        let detector_tasks = self.detector.detect_failures();

        let consensus_task = {
            let consensus = self.consensus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(CONSENSUS_WARMUP).await;
                consensus.start_consensus().await;
            })
        };

        info!("node {} running", self.self_endpoint);
        NodeHandle { receive_task, consensus_task, detector_tasks }
    }

    /// Start the node's background tasks and block until `ctrl_c` fires
    /// (spec.md §5: "implementations may add [a shutdown path] without
    /// altering semantics").
    pub async fn run(self) -> anyhow::Result<()> {
        let handle = self.start();
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received, stopping node {}", self.self_endpoint);
        handle.abort();
        Ok(())
    }
}

/// Handle to a node's background tasks, returned by [`Node::start`]. Dropping
/// it leaves the tasks running; call [`NodeHandle::abort`] to stop them.
pub struct NodeHandle {
    receive_task: tokio::task::JoinHandle<()>,
    consensus_task: tokio::task::JoinHandle<()>,
    detector_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl NodeHandle {
    /// Stop every background task this node is running (receive loop,
    /// consensus warm-up, and all detector workflows). Used by tests to
    /// simulate a node crashing; in production this runs once at shutdown.
    pub fn abort(&self) {
        self.receive_task.abort();
        self.consensus_task.abort();
        for t in &self.detector_tasks {
            t.abort();
        }
    }
}
