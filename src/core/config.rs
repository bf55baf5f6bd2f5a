//! Far-mesh configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::Error;
use crate::core::types::{MAP_GENERATION_LIMIT, MAX_STEP, Result, Step};
use crate::terrain::generator::TerrainParams;

/// Parameters of the distance-driven octree.
///
/// Client and server must agree on these exactly, otherwise they disagree
/// on which canonical cell a block belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarParams {
    /// log2 of the base cell size in blocks
    pub cell_size_pow: u8,
    /// Distance damping divisor (0 = none)
    pub quality: u16,
    /// log2 of the root box span in blocks
    pub tree_pow: u8,
    /// Largest step ever produced
    pub step_cap: Step,
}

impl Default for FarParams {
    fn default() -> Self {
        Self {
            cell_size_pow: 1,
            quality: 1,
            tree_pow: 16,
            step_cap: 12,
        }
    }
}

impl FarParams {
    /// Base cell edge in blocks
    pub fn base_cell(&self) -> i32 {
        1 << self.cell_size_pow
    }

    /// Alignment of the root box
    pub fn tree_align(&self) -> u32 {
        self.tree_pow as u32 - 1
    }

    /// Alignment used for candidates outside the root box
    pub fn external_pow(&self) -> u32 {
        self.tree_pow as u32 - 2
    }

    /// floor(log2(quality)), 0 when quality is 0 or 1
    pub fn quality_pow(&self) -> u32 {
        if self.quality <= 1 {
            0
        } else {
            15 - self.quality.leading_zeros()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(4..=30).contains(&self.tree_pow) {
            return Err(Error::Config(format!(
                "tree_pow {} outside 4..=30",
                self.tree_pow
            )));
        }
        if self.cell_size_pow as u32 > self.external_pow() {
            return Err(Error::Config(format!(
                "cell_size_pow {} exceeds tree_pow - 2 ({})",
                self.cell_size_pow,
                self.external_pow()
            )));
        }
        if self.step_cap > MAX_STEP {
            return Err(Error::Config(format!(
                "step_cap {} exceeds {}",
                self.step_cap, MAX_STEP
            )));
        }
        Ok(())
    }
}

/// Complete configuration of a far-mesh client or server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FarConfig {
    pub params: FarParams,
    /// Rays per scanner edge (grid_size² rays per direction)
    pub grid_size: u16,
    /// Maximum march steps per ray per pass
    pub iteration_cap: u32,
    /// Width in nodes of the plane the rays are spread over
    pub distance_min: u32,
    /// Depth in nodes a fresh ray starts at
    pub initial_distance: u32,
    /// Depth in nodes below which the oracle is not consulted
    pub min_streaming_range: u32,
    /// Viewer render range in nodes
    pub render_range: u32,
    /// Nodes beyond this are never scanned
    pub map_generation_limit: i32,
    /// Worker pool threads
    pub workers: usize,
    /// Blocks untouched this long after a complete pass are evicted
    pub clean_old_secs: u64,
    /// Most keys sent in one GetBlocks message
    pub flush_batch_max: usize,
    /// Also request the six face neighbours of every hit
    pub fill_neighbors: bool,
    /// Changed-block count after which the server resends everything (0 = never)
    pub all_changed: u32,
    /// Blocks a far server keeps in memory
    pub server_cache_blocks: usize,
    /// World directory holding the per-step tier databases
    pub world_dir: PathBuf,
    pub terrain: TerrainParams,
}

impl Default for FarConfig {
    fn default() -> Self {
        Self {
            params: FarParams::default(),
            grid_size: 32,
            iteration_cap: 200,
            distance_min: 144,
            initial_distance: 32,
            min_streaming_range: 128,
            render_range: 4096,
            map_generation_limit: MAP_GENERATION_LIMIT,
            workers: 6,
            clean_old_secs: 30,
            flush_batch_max: 256,
            fill_neighbors: true,
            all_changed: 0,
            server_cache_blocks: 4096,
            world_dir: PathBuf::from("world"),
            terrain: TerrainParams::default(),
        }
    }
}

impl FarConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: FarConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.grid_size == 0 {
            return Err(Error::Config("grid_size must be positive".into()));
        }
        if self.iteration_cap == 0 {
            return Err(Error::Config("iteration_cap must be positive".into()));
        }
        if self.distance_min == 0 {
            return Err(Error::Config("distance_min must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be positive".into()));
        }
        if self.flush_batch_max == 0 {
            return Err(Error::Config("flush_batch_max must be positive".into()));
        }
        if self.server_cache_blocks == 0 {
            return Err(Error::Config("server_cache_blocks must be positive".into()));
        }
        if self.map_generation_limit <= 0 || self.map_generation_limit > MAP_GENERATION_LIMIT {
            return Err(Error::Config(format!(
                "map_generation_limit {} outside 1..={}",
                self.map_generation_limit, MAP_GENERATION_LIMIT
            )));
        }
        Ok(())
    }

    /// Scan radius in nodes, rounded down to a multiple of 128
    pub fn distance_max(&self) -> u32 {
        self.render_range >> 7 << 7
    }
}
