//! Scenario 6 (spec.md §8): four nodes in a line topology where only
//! adjacent pairs exchange heartbeats directly. Killing the far end must
//! still reach the near end's suspect set once gossip propagates it across
//! the chain.

mod common;

use std::time::Duration;

use fdmesh_core::{Config, DetectorKind, Node};
use fdmesh_network::Endpoint;

#[tokio::test]
async fn suspicion_of_a_non_adjacent_peer_propagates_via_gossip() {
    let n1_ep = Endpoint::new("127.0.0.1", 19601);
    let n2_ep = Endpoint::new("127.0.0.1", 19602);
    let n3_ep = Endpoint::new("127.0.0.1", 19603);
    let n4_ep = Endpoint::new("127.0.0.1", 19604);

    // Line topology: N1-N2, N2-N3, N3-N4. N1 and N4 never hear each other
    // directly; gossip is the only way N1 can learn N4 is down.
    let mut c1 = Config::new(n1_ep.clone(), vec![n2_ep.clone()]);
    c1.failure_detector = DetectorKind::SimpleHeartbeat;
    c1.gossipping = true;
    let mut c2 = Config::new(n2_ep.clone(), vec![n1_ep.clone(), n3_ep.clone()]);
    c2.failure_detector = DetectorKind::SimpleHeartbeat;
    c2.gossipping = true;
    let mut c3 = Config::new(n3_ep.clone(), vec![n2_ep.clone(), n4_ep.clone()]);
    c3.failure_detector = DetectorKind::SimpleHeartbeat;
    c3.gossipping = true;
    let mut c4 = Config::new(n4_ep.clone(), vec![n3_ep.clone()]);
    c4.failure_detector = DetectorKind::SimpleHeartbeat;
    c4.gossipping = true;

    let n1 = Node::new(c1).await.unwrap();
    let n2 = Node::new(c2).await.unwrap();
    let n3 = Node::new(c3).await.unwrap();
    let n4 = Node::new(c4).await.unwrap();

    let _h1 = n1.start();
    let _h2 = n2.start();
    let _h3 = n3.start();
    let h4 = n4.start();

    h4.abort();

    let propagated = common::wait_until(Duration::from_millis(30_000), Duration::from_millis(500), || async {
        n1.suspected_list().contains(&n4_ep)
    })
    .await;
    assert!(propagated, "N1's suspect set must pick up N4 via gossip within 3 gossip intervals");
}
