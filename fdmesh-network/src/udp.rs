//! Datagram transport: one message per UDP packet, bound to the OS default
//! receive buffer (spec.md §4.1 — "messages larger than one datagram are
//! undefined").

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::transport::{FrameHandler, Transport};

/// Matches common OS defaults; a single send/receive call never exceeds this.
const MAX_DATAGRAM_SIZE: usize = 65_507;

pub struct UdpTransport {
    socket: UdpSocket,
    local: Endpoint,
}

impl UdpTransport {
    pub async fn bind(local: Endpoint) -> Result<Self, TransportError> {
        let addr = local.to_socket_addr().map_err(TransportError::Address)?;
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, local })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, bytes: &[u8], to: &Endpoint) -> Result<(), TransportError> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PayloadTooLarge(bytes.len()));
        }
        let addr = match to.to_socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("dropping send to unresolvable endpoint {}: {}", to, e);
                return Ok(());
            }
        };
        match self.socket.send_to(bytes, addr).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("udp send to {} failed: {}", to, e);
                Ok(())
            }
        }
    }

    async fn receive_loop(&self, on_frame: FrameHandler) -> Result<(), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    debug!("received {} bytes from {}", len, from);
                    on_frame(buf[..len].to_vec());
                }
                Err(e) => {
                    warn!("udp receive failed, continuing: {}", e);
                }
            }
        }
    }

    fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn round_trips_a_datagram_between_two_sockets() {
        let a = UdpTransport::bind(Endpoint::new("127.0.0.1", 0)).await.unwrap();
        let local_port = a.socket.local_addr().unwrap().port();
        let a_endpoint = Endpoint::new("127.0.0.1", local_port);

        let b = UdpTransport::bind(Endpoint::new("127.0.0.1", 0)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: FrameHandler = Arc::new(move |bytes| {
            let _ = tx.send(bytes);
        });

        tokio::spawn(async move {
            let _ = a.receive_loop(handler).await;
        });

        b.send(b"hello", &a_endpoint).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for datagram")
            .expect("channel closed");
        assert_eq!(received, b"hello");
    }
}
