//! Noise-based procedural terrain generation

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use super::biome::BiomeMap;
use super::oracle::VisibilityOracle;
use crate::core::config::FarParams;
use crate::core::types::{BLOCK_SIZE, BlockPos, NodePos, Step};
use crate::voxel::far_block::{FAR_BLOCK_VOLUME, FarBlock, grid_index};
use crate::voxel::node::{Node, content};

/// Parameters controlling terrain generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale in nodes (larger = smoother)
    pub height_scale: f32, // Vertical scale (max height in nodes)
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    pub sea_level: f32,    // Height below which is water
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 600.0,
            height_scale: 160.0,
            octaves: 5,
            persistence: 0.5,
            lacunarity: 2.0,
            sea_level: 40.0,
        }
    }
}

/// Procedural terrain generator using fractal Brownian motion (FBM)
pub struct TerrainGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
    biome_map: BiomeMap,
}

impl TerrainGenerator {
    /// Create a new terrain generator with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);
        let biome_map = BiomeMap::new(params.seed);

        Self { params, noise, biome_map }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    pub fn biome_map(&self) -> &BiomeMap {
        &self.biome_map
    }

    /// Terrain height at node column (x, z)
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let nx = (x / self.params.scale) as f64;
        let nz = (z / self.params.scale) as f64;

        // Noise in [-1, 1] mapped to [0, height_scale]
        let noise_value = self.noise.get([nx, nz]);
        let normalized = ((noise_value + 1.0) / 2.0).clamp(0.0, 1.0);
        (normalized * self.params.height_scale as f64) as f32
    }

    /// Highest solid node of a column
    pub fn ground_level(&self, x: i32, z: i32) -> i32 {
        self.height_at(x as f32, z as f32).floor() as i32
    }

    pub fn water_level(&self) -> i32 {
        self.params.sea_level as i32
    }

    /// Content at a node sampled with the given stride.
    ///
    /// The topmost sample of a column (within one stride of the surface)
    /// gets the biome surface, the next the filler, everything below stone.
    pub fn content_at(&self, pos: NodePos, stride: i32) -> Node {
        let height = self.height_at(pos.x as f32, pos.z as f32);
        self.content_in_column(pos, stride, height)
    }

    fn content_in_column(&self, pos: NodePos, stride: i32, height: f32) -> Node {
        let ground = height.floor() as i32;
        let water_level = self.water_level();
        let stride = stride.max(1);

        if pos.y > ground {
            if pos.y >= water_level {
                return Node::AIR;
            }
            let biome = self.biome_map.biome_at(
                pos.x as f32,
                pos.z as f32,
                height,
                self.params.sea_level,
            );
            let heat = self.biome_map.heat_at(pos.x as f32, pos.y as f32, pos.z as f32);
            if biome.freezes() || heat < 0 {
                return Node::new(content::ICE);
            }
            return Node::new(content::WATER);
        }

        let depth = ground.saturating_sub(pos.y);
        let biome = self.biome_map.biome_at(pos.x as f32, pos.z as f32, height, self.params.sea_level);
        if depth < stride {
            Node::new(biome.surface_content())
        } else if depth < stride.saturating_mul(4) {
            Node::new(biome.filler_content())
        } else {
            Node::new(content::STONE)
        }
    }

    /// Generate the far block at `(pos, step)`.
    ///
    /// The block spans `1 << (cell_size_pow + step)` map blocks; nodes are
    /// sampled on a `BLOCK_SIZE³` grid at that stride. Sample coordinates
    /// beyond the `i32` range are clamped.
    pub fn generate_block(
        &self,
        pos: BlockPos,
        step: Step,
        iteration: u32,
        params: &FarParams,
    ) -> FarBlock {
        let stride = 1i64 << (params.cell_size_pow as u32 + step as u32).min(32);
        let sample_stride = stride.min(i32::MAX as i64) as i32;
        let origin = pos.as_i64vec3() * BLOCK_SIZE as i64;

        let mut nodes = vec![Node::AIR; FAR_BLOCK_VOLUME];
        for z in 0..BLOCK_SIZE {
            for x in 0..BLOCK_SIZE {
                let col_x = sample_coord(origin.x, x, stride);
                let col_z = sample_coord(origin.z, z, stride);
                let height = self.height_at(col_x as f32, col_z as f32);
                for y in 0..BLOCK_SIZE {
                    let p = NodePos::new(col_x, sample_coord(origin.y, y, stride), col_z);
                    nodes[grid_index(x, y, z)] = self.content_in_column(p, sample_stride, height);
                }
            }
        }

        let half = BLOCK_SIZE / 2;
        let center = NodePos::new(
            sample_coord(origin.x, half, stride),
            sample_coord(origin.y, half, stride),
            sample_coord(origin.z, half, stride),
        );
        let heat = self
            .biome_map
            .heat_at(center.x as f32, center.y as f32, center.z as f32);
        let humidity = self.biome_map.humidity_at(center.x as f32, center.z as f32);

        FarBlock::from_nodes(pos, step, iteration, nodes, heat, humidity)
    }
}

/// Node coordinate of grid sample `i` along one axis
fn sample_coord(origin: i64, i: i32, stride: i64) -> i32 {
    (origin + i as i64 * stride).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl VisibilityOracle for TerrainGenerator {
    fn is_visible(&self, pos: NodePos) -> bool {
        self.ground_level(pos.x, pos.z) >= pos.y
    }

    fn is_visible_at_water_level(&self, pos: NodePos) -> bool {
        pos.y < self.water_level()
    }
}
