//! Core type aliases and constants

pub use glam::{IVec3, Vec3};

/// Position in map-block units
pub type BlockPos = IVec3;

/// Position in node units (block * BLOCK_SIZE)
pub type NodePos = IVec3;

/// Level of detail: 0 is full detail, each increment doubles the cell size
pub type Step = u8;

/// Nodes along one edge of a map block
pub const BLOCK_SIZE: i32 = 16;

/// log2(BLOCK_SIZE)
pub const BLOCK_SIZE_POW: u32 = 4;

/// Largest step any configuration may produce
pub const MAX_STEP: Step = 16;

/// Nodes beyond this distance from the origin are never generated
pub const MAP_GENERATION_LIMIT: i32 = 31007;

/// Standard Result type for farmesh
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Block containing the given node
pub fn node_to_block(node: NodePos) -> BlockPos {
    IVec3::new(
        node.x >> BLOCK_SIZE_POW,
        node.y >> BLOCK_SIZE_POW,
        node.z >> BLOCK_SIZE_POW,
    )
}

/// First node of the given block
pub fn block_to_node(block: BlockPos) -> NodePos {
    block * BLOCK_SIZE
}

/// Chebyshev (L-infinity) distance between two positions
pub fn radius_box(a: IVec3, b: IVec3) -> i32 {
    let d = (a - b).abs();
    d.x.max(d.y).max(d.z)
}
