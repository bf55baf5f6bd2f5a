//! TCP far-block client connection
//!
//! Reading and writing happen on background tokio tasks; the owner only
//! pushes messages into a channel and drains responses without blocking.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

use crate::NetError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Connection to a far-block server
pub struct FarConnection {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl FarConnection {
    /// Connect to a server. Must be called inside a tokio runtime.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let mut line = match serde_json::to_string(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        log::error!("Far client serialize error: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    log::error!("Far client write error: {}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ServerMessage>(trimmed) {
                            Ok(msg) => {
                                if in_tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Dropping malformed server message: {}", e),
                        }
                    }
                    Err(e) => {
                        log::error!("Far client read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            reader,
            writer,
        })
    }

    /// Queue a message for sending (never blocks)
    pub fn send(&self, msg: ClientMessage) -> Result<(), NetError> {
        self.outgoing.send(msg).map_err(|_| NetError::Closed)
    }

    /// Take one received message if any is ready
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.incoming.try_recv().ok()
    }

    /// Wait for the next received message
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    /// Handle for sending from other threads
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outgoing.clone()
    }
}

impl Drop for FarConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BlockKey, BlockData};
    use crate::server::{FarHandler, FarServer, PeerId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler {
        disconnected: AtomicUsize,
    }

    impl FarHandler for EchoHandler {
        fn handle_message(&self, _peer: PeerId, msg: ClientMessage) -> Vec<ServerMessage> {
            match msg {
                ClientMessage::Ping => vec![ServerMessage::Pong],
                ClientMessage::GetBlocks { blocks } => blocks
                    .into_iter()
                    .map(|key| {
                        ServerMessage::BlockData(BlockData {
                            pos: key.pos,
                            step: key.step,
                            iteration: key.iteration,
                            data: String::new(),
                            content_only: Some(1),
                            content_only_param1: 0,
                            content_only_param2: 0,
                            heat: 20,
                            humidity: 40,
                        })
                    })
                    .collect(),
                _ => Vec::new(),
            }
        }

        fn peer_disconnected(&self, _peer: PeerId) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let handler = Arc::new(EchoHandler {
            disconnected: AtomicUsize::new(0),
        });
        let server = FarServer::start(handler, "127.0.0.1:0").await.unwrap();

        let mut conn = FarConnection::connect(server.local_addr()).await.unwrap();
        conn.send(ClientMessage::Ping).unwrap();

        let reply = conn.recv().await;
        assert_eq!(reply, Some(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let handler = Arc::new(EchoHandler {
            disconnected: AtomicUsize::new(0),
        });
        let server = FarServer::start(handler, "127.0.0.1:0").await.unwrap();
        let mut conn = FarConnection::connect(server.local_addr()).await.unwrap();

        let keys = vec![
            BlockKey { pos: [16, 0, -32], step: 1, iteration: 3 },
            BlockKey { pos: [64, 0, 0], step: 2, iteration: 3 },
        ];
        conn.send(ClientMessage::GetBlocks { blocks: keys.clone() }).unwrap();

        for key in keys {
            match conn.recv().await {
                Some(ServerMessage::BlockData(data)) => {
                    assert_eq!(data.pos, key.pos);
                    assert_eq!(data.step, key.step);
                    assert_eq!(data.iteration, key.iteration);
                }
                other => panic!("Expected BlockData, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_json_reports_error() {
        let handler = Arc::new(EchoHandler {
            disconnected: AtomicUsize::new(0),
        });
        let server = FarServer::start(handler, "127.0.0.1:0").await.unwrap();

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{not json}\n").await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let reply: ServerMessage = serde_json::from_str(line.trim()).unwrap();
        assert!(matches!(reply, ServerMessage::Error { .. }));
    }
}
