//! Per-step far block databases

use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{BlockPos, Result, Step};
use crate::streaming::disk_io::{
    block_path, compress_block, decompress_block, parse_block_file_name, tier_dir,
};
use crate::voxel::far_block::FarBlock;

/// Storage for the far blocks of a single step
pub trait TierDatabase: Send + Sync {
    fn step(&self) -> Step;

    /// Load a block. `Ok(None)` if it was never saved.
    fn load_block(&self, pos: BlockPos) -> Result<Option<FarBlock>>;

    fn save_block(&self, block: &FarBlock) -> Result<()>;

    /// Every stored block position
    fn list_blocks(&self) -> Result<Vec<BlockPos>>;
}

/// Opens tier databases on demand
pub trait TierProvider: Send + Sync {
    fn open(&self, step: Step) -> Result<Arc<dyn TierDatabase>>;
}

/// Tier stored as one LZ4 compressed file per block under `far_<step>/`
pub struct FileTier {
    step: Step,
    dir: PathBuf,
}

impl FileTier {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tier_error(&self, e: io::Error) -> Error {
        Error::Tier {
            step: self.step,
            reason: e.to_string(),
        }
    }
}

impl TierDatabase for FileTier {
    fn step(&self) -> Step {
        self.step
    }

    fn load_block(&self, pos: BlockPos) -> Result<Option<FarBlock>> {
        let path = block_path(&self.dir, pos);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.tier_error(e)),
        };
        let block = decompress_block(&data)
            .map_err(|e| Error::Codec(format!("{}: {}", path.display(), e)))?;
        Ok(Some(block))
    }

    fn save_block(&self, block: &FarBlock) -> Result<()> {
        let path = block_path(&self.dir, block.pos);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.tier_error(e))?;
        }
        let data = compress_block(block).map_err(|e| Error::Codec(e.to_string()))?;
        fs::write(&path, data).map_err(|e| self.tier_error(e))
    }

    fn list_blocks(&self) -> Result<Vec<BlockPos>> {
        let mut blocks = Vec::new();
        for layer in fs::read_dir(&self.dir).map_err(|e| self.tier_error(e))? {
            let layer = layer.map_err(|e| self.tier_error(e))?;
            if !layer.file_type().map_err(|e| self.tier_error(e))?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(layer.path()).map_err(|e| self.tier_error(e))? {
                let entry = entry.map_err(|e| self.tier_error(e))?;
                if let Some(pos) = entry.file_name().to_str().and_then(parse_block_file_name) {
                    blocks.push(pos);
                }
            }
        }
        blocks.sort_by_key(|p| (p.y, p.z, p.x));
        Ok(blocks)
    }
}

/// Provider keeping every step in its own directory of a world directory
pub struct FileTierProvider {
    world_dir: PathBuf,
}

impl FileTierProvider {
    pub fn new(world_dir: impl Into<PathBuf>) -> Self {
        Self {
            world_dir: world_dir.into(),
        }
    }

    pub fn world_dir(&self) -> &Path {
        &self.world_dir
    }
}

impl TierProvider for FileTierProvider {
    fn open(&self, step: Step) -> Result<Arc<dyn TierDatabase>> {
        let dir = tier_dir(&self.world_dir, step);
        fs::create_dir_all(&dir).map_err(|e| Error::Tier {
            step,
            reason: format!("{}: {}", dir.display(), e),
        })?;
        info!("Opened far tier {} at {}", step, dir.display());
        Ok(Arc::new(FileTier { step, dir }))
    }
}
