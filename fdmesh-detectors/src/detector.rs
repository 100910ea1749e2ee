//! The failure-detector capability interface (spec.md §4.3): a common set of
//! six operations implemented by every concrete algorithm (4.3.1-4.3.5) and by
//! the gossip decorator (4.3.6).

use std::sync::Arc;

use async_trait::async_trait;
use fdmesh_network::{DetectorMessage, Endpoint, Transport};
use tokio::sync::mpsc;

/// Invoked by a detector's message handler with any sender not already known
/// to the node's neighbor set. The node-level implementation of this
/// callback both adds the endpoint to the neighbor set and calls the
/// detector's own `add_neighbor` (spec.md §4.5), so detectors may call it
/// unconditionally whenever they observe an unfamiliar sender.
pub type LearnNeighborFn = Arc<dyn Fn(Endpoint) + Send + Sync>;

#[async_trait]
pub trait FailureDetector: Send + Sync {
    /// Wire in the transport and the initial neighbor set; prepare per-peer
    /// health records. Must be called once before `detect_failures`.
    async fn initialize(
        &self,
        transport: Arc<dyn Transport>,
        neighbors: Vec<Endpoint>,
        on_failure_detected: mpsc::UnboundedSender<Endpoint>,
    );

    /// Spawn the periodic background workflows. Non-blocking: returns once
    /// the tasks are launched, not once they finish. The returned handles let
    /// a caller stop a detector's workflows (e.g. to simulate a crashed node
    /// in a test) without waiting for them to finish on their own.
    fn detect_failures(&self) -> Vec<tokio::task::JoinHandle<()>>;

    /// Try to consume `msg` as one of this detector's own wire types.
    /// Returns `true` iff it recognized and fully handled the message.
    async fn receive_message(&self, msg: &DetectorMessage, learn_neighbor: LearnNeighborFn) -> bool;

    /// Introduce a new peer (idempotent) and initialize its health record.
    fn add_neighbor(&self, neighbor: Endpoint);

    /// Bulk-inject suspects (used by the gossip decorator). Self is always
    /// excluded; already-present suspects are ignored.
    fn add_suspects(&self, suspects: Vec<Endpoint>);

    /// The current suspect set.
    fn get_suspected_list(&self) -> Vec<Endpoint>;
}
