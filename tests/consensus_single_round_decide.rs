//! Scenario 4 (spec.md §8): three healthy nodes each propose a distinct
//! value; a single Chandra–Toueg round must reach a quorum and every node
//! must decide on the same value.

mod common;

use std::time::Duration;

use fdmesh_core::{Config, Node};
use fdmesh_network::Endpoint;
use serde_json::json;

#[tokio::test]
async fn three_nodes_decide_on_the_same_value_in_one_round() {
    let n1_ep = Endpoint::new("127.0.0.1", 19401);
    let n2_ep = Endpoint::new("127.0.0.1", 19402);
    let n3_ep = Endpoint::new("127.0.0.1", 19403);

    let mut c1 = Config::new(n1_ep.clone(), vec![n2_ep.clone(), n3_ep.clone()]);
    c1.initial_value = json!("A");
    let mut c2 = Config::new(n2_ep.clone(), vec![n1_ep.clone(), n3_ep.clone()]);
    c2.initial_value = json!("B");
    let mut c3 = Config::new(n3_ep.clone(), vec![n1_ep.clone(), n2_ep.clone()]);
    c3.initial_value = json!("C");

    let n1 = Node::new(c1).await.unwrap();
    let n2 = Node::new(c2).await.unwrap();
    let n3 = Node::new(c3).await.unwrap();

    let _h1 = n1.start();
    let _h2 = n2.start();
    let _h3 = n3.start();

    n1.request_consensus().await;
    n2.request_consensus().await;
    n3.request_consensus().await;

    let decided = common::wait_until(Duration::from_millis(3_000), Duration::from_millis(100), || async {
        n1.current_value().await != json!(null)
            && n1.current_value().await == n2.current_value().await
            && n2.current_value().await == n3.current_value().await
    })
    .await;
    assert!(decided, "all three nodes must converge on the same decided value within one round");

    let winner = n1.current_value().await;
    assert!(
        winner == json!("A") || winner == json!("B") || winner == json!("C"),
        "decided value must be one of the proposed preferences, got {winner:?}"
    );
}
