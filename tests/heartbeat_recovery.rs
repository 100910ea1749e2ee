//! Scenario 1 (spec.md §8): three nodes running the fixed-roundtrip heartbeat
//! detector. Pausing a neighbor's background workflows must cost it a
//! conviction within one failure-detection interval; resuming it must clear
//! the conviction within one heartbeat interval.

mod common;

use std::time::Duration;

use fdmesh_core::{Config, DetectorKind, Node};
use fdmesh_network::Endpoint;

#[tokio::test]
async fn three_node_heartbeat_recovery() {
    let n1_ep = Endpoint::new("127.0.0.1", 19101);
    let n2_ep = Endpoint::new("127.0.0.1", 19102);
    let n3_ep = Endpoint::new("127.0.0.1", 19103);

    let mut c1 = Config::new(n1_ep.clone(), vec![n2_ep.clone(), n3_ep.clone()]);
    c1.failure_detector = DetectorKind::SimpleHeartbeat;
    let mut c2 = Config::new(n2_ep.clone(), vec![n1_ep.clone(), n3_ep.clone()]);
    c2.failure_detector = DetectorKind::SimpleHeartbeat;
    let mut c3 = Config::new(n3_ep.clone(), vec![n1_ep.clone(), n2_ep.clone()]);
    c3.failure_detector = DetectorKind::SimpleHeartbeat;

    let n1 = Node::new(c1).await.unwrap();
    let n2 = Node::new(c2).await.unwrap();
    let n3 = Node::new(c3).await.unwrap();

    let _h1 = n1.start();
    let _h2 = n2.start();
    let mut h3 = n3.start();

    // Let a couple of heartbeats flow before pausing N3.
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    h3.abort();

    let suspected = common::wait_until(Duration::from_millis(4_500), Duration::from_millis(200), || async {
        n1.suspected_list().contains(&n3_ep) && n2.suspected_list().contains(&n3_ep)
    })
    .await;
    assert!(suspected, "N1 and N2 must suspect a paused N3 within one failure-detection interval");

    // Resume N3 by relaunching its background workflows.
    h3 = n3.start();

    let recovered = common::wait_until(Duration::from_millis(3_000), Duration::from_millis(200), || async {
        !n1.suspected_list().contains(&n3_ep) && !n2.suspected_list().contains(&n3_ep)
    })
    .await;
    assert!(recovered, "N1 and N2 must un-suspect N3 within one heartbeat interval after it resumes");

    h3.abort();
}
