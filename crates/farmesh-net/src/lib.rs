//! Far-block wire protocol for farmesh - newline-delimited JSON over TCP
//!
//! Serve far blocks from your application:
//! ```ignore
//! let handler: Arc<dyn FarHandler> = Arc::new(MyHandler::new());
//! let _server = FarServer::start(handler, DEFAULT_PORT).await?;
//! ```
//!
//! And talk to it from a client:
//! ```ignore
//! let mut conn = FarConnection::connect(("127.0.0.1", DEFAULT_PORT)).await?;
//! conn.send(ClientMessage::Ping)?;
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use client::FarConnection;
pub use protocol::*;
pub use server::{FarHandler, FarServer, PeerId};

/// Default far-block server port
pub const DEFAULT_PORT: u16 = 30120;

/// Protocol revision sent in `ClientMessage::Init`
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors raised by the transport layer
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,
}
