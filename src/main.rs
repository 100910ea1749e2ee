//! fdmesh — a peer-to-peer node for experimenting with unreliable failure
//! detectors and failure-detector-driven consensus.
//!
//! CLI contract (spec.md §6): `fdmesh <self-host:self-port>
//! [neighbor1:port,neighbor2:port,...] [initialValue]`. Missing or malformed
//! arguments print a usage banner and exit non-zero; a normally-terminated
//! run (Ctrl+C) exits 0.

use anyhow::{Context, Result};
use clap::Parser;
use fdmesh_core::{Config, DetectorKind, Node, Protocol};
use fdmesh_network::Endpoint;
use tracing::info;

/// A peer-to-peer node for experimenting with unreliable failure detectors
/// and failure-detector-driven consensus.
#[derive(Parser, Debug)]
#[command(name = "fdmesh", version, about)]
struct Cli {
    /// This node's own address, e.g. 127.0.0.1:1234
    self_addr: String,

    /// Comma-separated neighbor addresses, e.g. 127.0.0.1:1235,127.0.0.1:1236
    neighbors: Option<String>,

    /// Initial value this node proposes to consensus
    initial_value: Option<String>,

    /// Use TCP instead of UDP
    #[arg(long)]
    tcp: bool,

    /// Failure detector algorithm to run
    #[arg(long, value_enum, default_value = "heartbeat-sliding-window")]
    detector: DetectorArg,

    /// Enable gossip propagation of suspect sets
    #[arg(long)]
    gossip: bool,

    /// Emit per-tick detector traces
    #[arg(long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DetectorArg {
    PingAck,
    SimpleHeartbeat,
    HeartbeatRecovery,
    HeartbeatSlidingWindow,
    HeartbeatSuspectLevel,
}

impl From<DetectorArg> for DetectorKind {
    fn from(d: DetectorArg) -> Self {
        match d {
            DetectorArg::PingAck => DetectorKind::PingAck,
            DetectorArg::SimpleHeartbeat => DetectorKind::SimpleHeartbeat,
            DetectorArg::HeartbeatRecovery => DetectorKind::HeartbeatRecovery,
            DetectorArg::HeartbeatSlidingWindow => DetectorKind::HeartbeatSlidingWindow,
            DetectorArg::HeartbeatSuspectLevel => DetectorKind::HeartbeatSuspectLevel,
        }
    }
}

fn parse_neighbors(raw: &str) -> Result<Vec<Endpoint>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Endpoint>().with_context(|| format!("invalid neighbor address '{}'", s)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive("fdmesh=info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let self_endpoint: Endpoint = cli
        .self_addr
        .parse()
        .with_context(|| format!("invalid self address '{}'; expected host:port", cli.self_addr))?;

    let neighbors = match &cli.neighbors {
        Some(raw) => parse_neighbors(raw)?,
        None => Vec::new(),
    };

    let initial_value = match &cli.initial_value {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.clone())),
        None => serde_json::Value::Null,
    };

    let mut config = Config::new(self_endpoint.clone(), neighbors);
    config.network_protocol = if cli.tcp { Protocol::Tcp } else { Protocol::Udp };
    config.failure_detector = cli.detector.into();
    config.gossipping = cli.gossip;
    config.verbose = cli.verbose;
    config.initial_value = initial_value;

    info!("starting node {} (detector={:?}, gossip={})", self_endpoint, config.failure_detector, config.gossipping);

    let node = Node::new(config).await.with_context(|| format!("failed to start node on {}", self_endpoint))?;
    node.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_neighbor_list() {
        let neighbors = parse_neighbors("127.0.0.1:1234,127.0.0.1:1235").unwrap();
        assert_eq!(neighbors, vec![Endpoint::new("127.0.0.1", 1234), Endpoint::new("127.0.0.1", 1235)]);
    }

    #[test]
    fn empty_neighbor_string_yields_no_neighbors() {
        assert!(parse_neighbors("").unwrap().is_empty());
    }

    #[test]
    fn rejects_a_malformed_neighbor_address() {
        assert!(parse_neighbors("not-an-address").is_err());
    }
}
