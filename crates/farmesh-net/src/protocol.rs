//! Far-block protocol - JSON message definitions

use serde::{Deserialize, Serialize};

/// Messages sent from a far-mesh client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum ClientMessage {
    /// Announce the client protocol revision
    Init { version: u32 },
    /// Request a batch of far blocks
    GetBlocks { blocks: Vec<BlockKey> },
    /// Viewer draw-control parameters relevant to far blocks
    DrawControl(DrawControl),
    /// Health check
    Ping,
}

/// Messages sent from the server to a far-mesh client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", content = "params")]
pub enum ServerMessage {
    /// A far block payload
    BlockData(BlockData),
    /// The server cannot provide a block
    BlockUnavailable {
        pos: [i32; 3],
        step: u8,
        /// No retry will ever succeed during this session
        permanent: bool,
    },
    /// Enough of the world changed that every far block must be requested again
    AllChanged,
    Pong,
    Error { message: String },
}

/// Identity of a requested far block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    /// Canonical block position
    pub pos: [i32; 3],
    pub step: u8,
    /// Scan iteration that produced the request
    pub iteration: u32,
}

/// Far block as transferred over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub pos: [i32; 3],
    pub step: u8,
    pub iteration: u32,
    /// Base64 of the compressed block payload
    pub data: String,
    /// Content id when the whole block is a single material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_only: Option<u16>,
    #[serde(default)]
    pub content_only_param1: u8,
    #[serde(default)]
    pub content_only_param2: u8,
    pub heat: i16,
    pub humidity: i16,
}

/// Draw-control parameters the server needs from a viewer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawControl {
    /// Viewer position in block units
    pub viewer: [i32; 3],
    /// Desired render range in nodes
    pub range: u32,
    /// Whether far blocks are wanted at all
    pub farmesh: bool,
    /// Distance damping divisor (0 = none)
    pub quality: u16,
    /// Changed-block count that forces a full re-send (0 = never)
    pub all_changed: u32,
}

impl Default for DrawControl {
    fn default() -> Self {
        Self {
            viewer: [0, 0, 0],
            range: 2048,
            farmesh: true,
            quality: 1,
            all_changed: 0,
        }
    }
}

impl ServerMessage {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn unavailable(pos: [i32; 3], step: u8, permanent: bool) -> Self {
        Self::BlockUnavailable {
            pos,
            step,
            permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_blocks_json_shape() {
        let msg = ClientMessage::GetBlocks {
            blocks: vec![BlockKey {
                pos: [1, -2, 3],
                step: 4,
                iteration: 7,
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"cmd\":\"GetBlocks\""));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_block_data_content_only_is_optional() {
        let json = r#"{"msg":"BlockData","params":{"pos":[0,0,0],"step":2,"iteration":1,"data":"","heat":10,"humidity":-3}}"#;
        let parsed: ServerMessage = serde_json::from_str(json).unwrap();
        match parsed {
            ServerMessage::BlockData(data) => {
                assert_eq!(data.content_only, None);
                assert_eq!(data.content_only_param1, 0);
                assert_eq!(data.step, 2);
                assert_eq!(data.humidity, -3);
            }
            other => panic!("Expected BlockData, got {:?}", other),
        }
    }

    #[test]
    fn test_unit_variants() {
        let json = serde_json::to_string(&ServerMessage::AllChanged).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ServerMessage::AllChanged);

        let parsed: ClientMessage = serde_json::from_str(r#"{"cmd":"Ping"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Ping);
    }

    #[test]
    fn test_draw_control_default() {
        let dc = DrawControl::default();
        assert!(dc.farmesh);
        assert_eq!(dc.quality, 1);
        assert_eq!(dc.all_changed, 0);
    }
}
