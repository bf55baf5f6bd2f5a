//! FarBlock - a coarse terrain block covering many map blocks.
//!
//! A far block at `(pos, step)` spans `1 << (cell_size_pow + step)` map blocks
//! along each axis. Its payload is a `BLOCK_SIZE³` node grid sampled at that
//! stride, or a single uniform node when the whole block is one material.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::types::{BLOCK_SIZE, BlockPos, Step};
use crate::voxel::node::Node;

/// Nodes in a far block payload
pub const FAR_BLOCK_VOLUME: usize = (BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE) as usize;

/// Identity of a far block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FarKey {
    pub pos: BlockPos,
    pub step: Step,
}

impl FarKey {
    pub fn new(pos: BlockPos, step: Step) -> Self {
        Self { pos, step }
    }
}

/// Opaque handle returned by the mesh consumer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u64);

/// Coarse terrain block
pub struct FarBlock {
    pub pos: BlockPos,
    pub step: Step,
    /// Scan iteration that requested this block
    pub iteration: u32,
    /// Set when every node is identical; `nodes` is then empty
    pub content_only: Option<Node>,
    pub heat: i16,
    pub humidity: i16,
    nodes: Vec<Node>,
    /// Uptime seconds of the last scan that needed this block
    last_touched: AtomicU64,
    mesh: OnceLock<MeshHandle>,
}

impl std::fmt::Debug for FarBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FarBlock")
            .field("pos", &self.pos)
            .field("step", &self.step)
            .field("iteration", &self.iteration)
            .field("content_only", &self.content_only)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl FarBlock {
    /// Create from a full node grid (x fastest, then y, then z).
    ///
    /// A uniform grid collapses to `content_only`. A grid of the wrong
    /// length is treated as all-ignore.
    pub fn from_nodes(
        pos: BlockPos,
        step: Step,
        iteration: u32,
        nodes: Vec<Node>,
        heat: i16,
        humidity: i16,
    ) -> Self {
        if nodes.len() != FAR_BLOCK_VOLUME {
            return Self::uniform(pos, step, iteration, Node::IGNORE, heat, humidity);
        }
        let first = nodes[0];
        if nodes.iter().all(|n| *n == first) {
            return Self::uniform(pos, step, iteration, first, heat, humidity);
        }
        Self {
            pos,
            step,
            iteration,
            content_only: None,
            heat,
            humidity,
            nodes,
            last_touched: AtomicU64::new(0),
            mesh: OnceLock::new(),
        }
    }

    /// Create a block filled with one node
    pub fn uniform(
        pos: BlockPos,
        step: Step,
        iteration: u32,
        node: Node,
        heat: i16,
        humidity: i16,
    ) -> Self {
        Self {
            pos,
            step,
            iteration,
            content_only: Some(node),
            heat,
            humidity,
            nodes: Vec::new(),
            last_touched: AtomicU64::new(0),
            mesh: OnceLock::new(),
        }
    }

    pub fn key(&self) -> FarKey {
        FarKey::new(self.pos, self.step)
    }

    /// Node at local grid coordinates (each in 0..BLOCK_SIZE)
    pub fn node_at(&self, x: i32, y: i32, z: i32) -> Node {
        if let Some(node) = self.content_only {
            return node;
        }
        self.nodes
            .get(grid_index(x, y, z))
            .copied()
            .unwrap_or(Node::IGNORE)
    }

    /// Raw node grid, empty for uniform blocks
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Expand to a full node grid
    pub fn to_nodes(&self) -> Vec<Node> {
        match self.content_only {
            Some(node) => vec![node; FAR_BLOCK_VOLUME],
            None => self.nodes.clone(),
        }
    }

    /// Edge length in map blocks
    pub fn extent_blocks(&self, cell_size_pow: u8) -> i32 {
        1 << (cell_size_pow as u32 + self.step as u32)
    }

    /// Nothing to render
    pub fn is_empty(&self) -> bool {
        matches!(self.content_only, Some(node) if node.is_air() || node.is_ignore())
    }

    pub fn touch(&self, now: u64) {
        self.last_touched.fetch_max(now, Ordering::Relaxed);
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched.load(Ordering::Relaxed)
    }

    pub fn mesh(&self) -> Option<MeshHandle> {
        self.mesh.get().copied()
    }

    /// Attach a mesh. Returns false if one was already attached.
    pub fn set_mesh(&self, handle: MeshHandle) -> bool {
        self.mesh.set(handle).is_ok()
    }
}

/// Index into a far block node grid
pub fn grid_index(x: i32, y: i32, z: i32) -> usize {
    (x + y * BLOCK_SIZE + z * BLOCK_SIZE * BLOCK_SIZE) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::node::content;
    use glam::IVec3;

    fn mixed_nodes() -> Vec<Node> {
        (0..FAR_BLOCK_VOLUME)
            .map(|i| if i % 2 == 0 { Node::new(content::STONE) } else { Node::AIR })
            .collect()
    }

    #[test]
    fn test_uniform_grid_collapses() {
        let nodes = vec![Node::new(content::STONE); FAR_BLOCK_VOLUME];
        let block = FarBlock::from_nodes(IVec3::ZERO, 1, 0, nodes, 0, 0);
        assert_eq!(block.content_only, Some(Node::new(content::STONE)));
        assert!(block.nodes().is_empty());
        assert_eq!(block.node_at(3, 4, 5).content, content::STONE);
    }

    #[test]
    fn test_mixed_grid_keeps_nodes() {
        let block = FarBlock::from_nodes(IVec3::ZERO, 1, 0, mixed_nodes(), 0, 0);
        assert_eq!(block.content_only, None);
        assert_eq!(block.node_at(0, 0, 0).content, content::STONE);
        assert!(block.node_at(1, 0, 0).is_air());
        assert_eq!(block.to_nodes().len(), FAR_BLOCK_VOLUME);
    }

    #[test]
    fn test_wrong_length_is_ignore() {
        let block = FarBlock::from_nodes(IVec3::ZERO, 1, 0, vec![Node::AIR; 3], 0, 0);
        assert_eq!(block.content_only, Some(Node::IGNORE));
        assert!(block.is_empty());
    }

    #[test]
    fn test_touch_is_monotonic() {
        let block = FarBlock::uniform(IVec3::ZERO, 2, 0, Node::AIR, 0, 0);
        block.touch(10);
        block.touch(5);
        assert_eq!(block.last_touched(), 10);
    }

    #[test]
    fn test_mesh_set_once() {
        let block = FarBlock::uniform(IVec3::ZERO, 2, 0, Node::new(content::STONE), 0, 0);
        assert!(block.mesh().is_none());
        assert!(block.set_mesh(MeshHandle(7)));
        assert!(!block.set_mesh(MeshHandle(8)));
        assert_eq!(block.mesh(), Some(MeshHandle(7)));
    }

    #[test]
    fn test_extent() {
        let block = FarBlock::uniform(IVec3::ZERO, 3, 0, Node::AIR, 0, 0);
        assert_eq!(block.extent_blocks(1), 16);
        assert_eq!(block.extent_blocks(4), 128);
    }
}
