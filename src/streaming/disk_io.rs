//! Far block serialization and on-disk layout

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use farmesh_net::BlockData;
use glam::IVec3;
use rkyv::{Archive, Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::core::types::{BlockPos, Step};
use crate::voxel::far_block::{FAR_BLOCK_VOLUME, FarBlock};
use crate::voxel::node::Node;

/// Upper bound of a serialized block: full node grid plus header
pub const MAX_SERIALIZED_BLOCK: usize = FAR_BLOCK_VOLUME * std::mem::size_of::<Node>() + 1024;

/// Serializable far block
#[derive(Archive, Deserialize, Serialize)]
pub struct FarBlockData {
    pub pos_x: i32,
    pub pos_y: i32,
    pub pos_z: i32,
    pub step: u8,
    pub iteration: u32,
    pub uniform: bool,
    /// The single node when `uniform` is set
    pub content_only: Node,
    pub heat: i16,
    pub humidity: i16,
    pub nodes: Vec<Node>,
}

/// Serialize a far block to bytes (uncompressed)
pub fn serialize_block(block: &FarBlock) -> Result<Vec<u8>, io::Error> {
    let data = FarBlockData {
        pos_x: block.pos.x,
        pos_y: block.pos.y,
        pos_z: block.pos.z,
        step: block.step,
        iteration: block.iteration,
        uniform: block.content_only.is_some(),
        content_only: block.content_only.unwrap_or(Node::IGNORE),
        heat: block.heat,
        humidity: block.humidity,
        nodes: block.nodes().to_vec(),
    };

    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&data)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(bytes.to_vec())
}

/// Deserialize a far block from bytes (uncompressed)
pub fn deserialize_block(data: &[u8]) -> Result<FarBlock, io::Error> {
    let archived = rkyv::access::<ArchivedFarBlockData, rkyv::rancor::Error>(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let data: FarBlockData = rkyv::deserialize::<FarBlockData, rkyv::rancor::Error>(archived)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let pos = IVec3::new(data.pos_x, data.pos_y, data.pos_z);
    if data.uniform {
        return Ok(FarBlock::uniform(
            pos,
            data.step,
            data.iteration,
            data.content_only,
            data.heat,
            data.humidity,
        ));
    }
    Ok(FarBlock::from_nodes(
        pos,
        data.step,
        data.iteration,
        data.nodes,
        data.heat,
        data.humidity,
    ))
}

/// Serialize and compress a far block using LZ4
pub fn compress_block(block: &FarBlock) -> Result<Vec<u8>, io::Error> {
    let serialized = serialize_block(block)?;
    Ok(lz4_flex::compress_prepend_size(&serialized))
}

/// Decompress and deserialize a far block.
///
/// The size prefix is checked against `MAX_SERIALIZED_BLOCK` before anything
/// is allocated.
pub fn decompress_block(data: &[u8]) -> Result<FarBlock, io::Error> {
    let Some(prefix) = data.get(..4) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "far block payload shorter than its size prefix",
        ));
    };
    let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if size > MAX_SERIALIZED_BLOCK {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("far block size {} exceeds {}", size, MAX_SERIALIZED_BLOCK),
        ));
    }
    let decompressed = lz4_flex::decompress_size_prepended(data).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("LZ4 decompression failed: {}", e),
        )
    })?;
    deserialize_block(&decompressed)
}

/// Build the wire form of a block.
///
/// Uniform blocks travel as `content_only` fields with an empty payload.
pub fn block_to_wire(block: &FarBlock) -> Result<BlockData, io::Error> {
    let (data, content_only, param1, param2) = match block.content_only {
        Some(node) => (String::new(), Some(node.content), node.param1, node.param2),
        None => (BASE64.encode(compress_block(block)?), None, 0, 0),
    };
    Ok(BlockData {
        pos: block.pos.to_array(),
        step: block.step,
        iteration: block.iteration,
        data,
        content_only,
        content_only_param1: param1,
        content_only_param2: param2,
        heat: block.heat,
        humidity: block.humidity,
    })
}

/// Rebuild a block from its wire form.
///
/// Identity fields from the message win over whatever the payload carries.
pub fn block_from_wire(msg: &BlockData) -> Result<FarBlock, io::Error> {
    let pos = IVec3::from_array(msg.pos);
    if let Some(content) = msg.content_only {
        let node = Node {
            content,
            param1: msg.content_only_param1,
            param2: msg.content_only_param2,
        };
        return Ok(FarBlock::uniform(
            pos,
            msg.step,
            msg.iteration,
            node,
            msg.heat,
            msg.humidity,
        ));
    }

    let compressed = BASE64
        .decode(msg.data.as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let decoded = decompress_block(&compressed)?;
    Ok(match decoded.content_only {
        Some(node) => FarBlock::uniform(pos, msg.step, msg.iteration, node, msg.heat, msg.humidity),
        None => FarBlock::from_nodes(
            pos,
            msg.step,
            msg.iteration,
            decoded.to_nodes(),
            msg.heat,
            msg.humidity,
        ),
    })
}

/// Directory holding every block of one step
pub fn tier_dir(world_dir: &Path, step: Step) -> PathBuf {
    world_dir.join(format!("far_{}", step))
}

/// File path of a block within its tier directory
pub fn block_path(tier_dir: &Path, pos: BlockPos) -> PathBuf {
    // Subdirectories by Y keep directory sizes manageable
    tier_dir
        .join(format!("y_{}", pos.y))
        .join(format!("block_{}_{}_{}.fab", pos.x, pos.y, pos.z))
}

/// Parse a block position back out of a file name produced by `block_path`
pub fn parse_block_file_name(name: &str) -> Option<BlockPos> {
    let coords = name.strip_prefix("block_")?.strip_suffix(".fab")?;
    let mut parts = coords.split('_').map(|p| p.parse::<i32>());
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(IVec3::new(x, y, z))
}
