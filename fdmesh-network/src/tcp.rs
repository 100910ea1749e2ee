//! Length-prefixed stream transport: each message is framed individually
//! with a 4-byte native-endian length prefix, then the payload (spec.md
//! §4.1, §6). Partial reads are retried via `read_exact` until the full
//! frame is present.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::transport::{FrameHandler, Transport};

pub struct TcpTransport {
    listener: TcpListener,
    local: Endpoint,
}

impl TcpTransport {
    pub async fn bind(local: Endpoint) -> Result<Self, TransportError> {
        let addr = local.to_socket_addr().map_err(TransportError::Address)?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, local })
    }

    async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
        stream.write_all(&(bytes.len() as u32).to_ne_bytes()).await?;
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut len_buf).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(e);
        }
        let len = u32::from_ne_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, bytes: &[u8], to: &Endpoint) -> Result<(), TransportError> {
        let addr = match to.to_socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("dropping send to unresolvable endpoint {}: {}", to, e);
                return Ok(());
            }
        };
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                if let Err(e) = Self::write_frame(&mut stream, bytes).await {
                    warn!("tcp send to {} failed: {}", to, e);
                }
                Ok(())
            }
            Err(e) => {
                warn!("tcp connect to {} failed: {}", to, e);
                Ok(())
            }
        }
    }

    async fn receive_loop(&self, on_frame: FrameHandler) -> Result<(), TransportError> {
        loop {
            match self.listener.accept().await {
                Ok((mut stream, peer)) => {
                    let on_frame = on_frame.clone();
                    tokio::spawn(async move {
                        loop {
                            match Self::read_frame(&mut stream).await {
                                Ok(Some(payload)) => {
                                    debug!("received {} bytes from {}", payload.len(), peer);
                                    on_frame(payload);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("tcp read from {} failed, closing: {}", peer, e);
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("tcp accept failed, continuing: {}", e);
                }
            }
        }
    }

    fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }
}

/// Convenience alias used by the node when it needs the trait object form.
pub fn boxed(transport: TcpTransport) -> Arc<dyn Transport> {
    Arc::new(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn round_trips_a_framed_message_between_two_sockets() {
        let server = TcpTransport::bind(Endpoint::new("127.0.0.1", 0)).await.unwrap();
        let server_port = server.listener.local_addr().unwrap().port();
        let server_endpoint = Endpoint::new("127.0.0.1", server_port);

        let client = TcpTransport::bind(Endpoint::new("127.0.0.1", 0)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: FrameHandler = Arc::new(move |bytes| {
            let _ = tx.send(bytes);
        });

        tokio::spawn(async move {
            let _ = server.receive_loop(handler).await;
        });

        client.send(b"hello over tcp", &server_endpoint).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        assert_eq!(received, b"hello over tcp");
    }
}
