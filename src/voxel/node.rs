//! Map node data type

use rkyv::{Archive, Deserialize, Serialize};

/// Content id of a node type
pub type ContentId = u16;

/// Empty space
pub const CONTENT_AIR: ContentId = 126;
/// Unknown or not yet generated
pub const CONTENT_IGNORE: ContentId = 127;

/// Content ids used by the built-in terrain generator
pub mod content {
    use super::ContentId;

    pub const STONE: ContentId = 1;
    pub const WATER: ContentId = 2;
    pub const DIRT: ContentId = 3;
    pub const GRASS: ContentId = 4;
    pub const DRY_GRASS: ContentId = 5;
    pub const SNOW: ContentId = 6;
    pub const SAND: ContentId = 7;
    pub const ICE: ContentId = 8;
}

/// Single map node - exactly 4 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Archive, Deserialize, Serialize)]
pub struct Node {
    pub content: ContentId,
    /// Light or type-specific data
    pub param1: u8,
    /// Rotation or type-specific data
    pub param2: u8,
}

impl Node {
    pub const AIR: Node = Node {
        content: CONTENT_AIR,
        param1: 0,
        param2: 0,
    };

    pub const IGNORE: Node = Node {
        content: CONTENT_IGNORE,
        param1: 0,
        param2: 0,
    };

    pub fn new(content: ContentId) -> Self {
        Self {
            content,
            param1: 0,
            param2: 0,
        }
    }

    pub fn is_air(&self) -> bool {
        self.content == CONTENT_AIR
    }

    pub fn is_ignore(&self) -> bool {
        self.content == CONTENT_IGNORE
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::AIR
    }
}
