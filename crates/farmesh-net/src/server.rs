//! TCP far-block server

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::NetError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Identifies one client connection for the lifetime of the server
pub type PeerId = u64;

/// Trait that the application implements to answer far-block traffic.
///
/// Handlers are called from blocking worker threads, so they may do disk I/O
/// or terrain generation directly.
pub trait FarHandler: Send + Sync + 'static {
    fn handle_message(&self, peer: PeerId, msg: ClientMessage) -> Vec<ServerMessage>;

    /// Called once when a peer's connection closes
    fn peer_disconnected(&self, _peer: PeerId) {}
}

/// Server handle - keep this alive to keep the server running
pub struct FarServer {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl FarServer {
    /// Bind and start serving in the background.
    pub async fn start(
        handler: Arc<dyn FarHandler>,
        addr: impl ToSocketAddrs,
    ) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Far-block server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            let next_peer = AtomicU64::new(1);
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let peer = next_peer.fetch_add(1, Ordering::Relaxed);
                        log::info!("Far client {} connected from {}", peer, addr);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, handler.clone()).await;
                            handler.peer_disconnected(peer);
                            log::info!("Far client {} disconnected", peer);
                        });
                    }
                    Err(e) => {
                        log::error!("Far server accept error: {}", e);
                    }
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for FarServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: PeerId,
    handler: Arc<dyn FarHandler>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
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

                let responses = match serde_json::from_str::<ClientMessage>(trimmed) {
                    Ok(msg) => {
                        log::trace!("Far message from {}: {:?}", peer, msg);
                        let handler = handler.clone();
                        match tokio::task::spawn_blocking(move || handler.handle_message(peer, msg))
                            .await
                        {
                            Ok(responses) => responses,
                            Err(e) => {
                                log::error!("Far handler panicked: {}", e);
                                vec![ServerMessage::error("internal error")]
                            }
                        }
                    }
                    Err(e) => vec![ServerMessage::error(format!("Invalid message JSON: {}", e))],
                };

                if let Err(e) = write_messages(&mut writer, &responses).await {
                    log::error!("Far server write error: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Far server read error: {}", e);
                break;
            }
        }
    }
}

async fn write_messages(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    messages: &[ServerMessage],
) -> Result<(), NetError> {
    if messages.is_empty() {
        return Ok(());
    }
    let mut out = String::new();
    for msg in messages {
        out.push_str(&serde_json::to_string(msg)?);
        out.push('\n');
    }
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
