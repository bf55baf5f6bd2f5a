//! Map nodes and coarse far blocks

pub mod node;
pub mod far_block;

pub use node::{ContentId, Node, CONTENT_AIR, CONTENT_IGNORE};
pub use far_block::{FarBlock, FarKey, MeshHandle, FAR_BLOCK_VOLUME};
