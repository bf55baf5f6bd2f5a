//! Ray scanners discovering which far blocks are visible.
//!
//! Six scanners, one per cardinal direction, each cast a `grid_size²` fan of
//! rays from the viewer. A ray marches with steps that grow with the LOD step
//! at its current position, asks the visibility oracle whether terrain is
//! there, and hands the first visible block to a [`FarBlockSink`]. Progress is
//! kept per ray so a pass may resume where the previous one stopped.

use glam::Vec3;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::config::FarConfig;
use crate::core::types::{
    BLOCK_SIZE, BlockPos, NodePos, Step, block_to_node, node_to_block, radius_box,
};
use crate::math::{Direction, FACE_NEIGHBORS, Ray};
use crate::streaming::lod::{player_block_align, resolve_step};
use crate::terrain::oracle::VisibilityOracle;

/// Distance value of a ray that will not be marched again until reset
pub const RAY_FINISHED: u32 = u32::MAX;

/// Receives blocks the scanners found visible
pub trait FarBlockSink: Send + Sync {
    fn on_visible(&self, pos: BlockPos, ctx: &ScanContext);
}

/// Per-tick snapshot shared by every lane of a pass
#[derive(Clone, Debug)]
pub struct ScanContext {
    /// Aligned viewer position in nodes; rays start here
    pub viewer_node: NodePos,
    /// Aligned viewer position in blocks
    pub viewer_block: BlockPos,
    /// Scan radius in nodes
    pub distance_max: u32,
    pub iteration: u32,
    /// Uptime seconds
    pub now: u64,
    pub config: Arc<FarConfig>,
}

impl ScanContext {
    /// Snapshot for a viewer standing at `viewer` (nodes)
    pub fn new(viewer: NodePos, iteration: u32, now: u64, config: Arc<FarConfig>) -> Self {
        let viewer_block = player_block_align(node_to_block(viewer), &config.params);
        Self {
            viewer_node: block_to_node(viewer_block),
            viewer_block,
            distance_max: config.distance_max(),
            iteration,
            now,
            config,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayCacheEntry {
    /// Depth in nodes reached so far, or `RAY_FINISHED`
    pub distance_marched: u32,
    /// Total march steps taken since the last reset
    pub step_num: u32,
}

impl RayCacheEntry {
    fn fresh(initial_distance: u32) -> Self {
        Self {
            distance_marched: initial_distance,
            step_num: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.distance_marched == RAY_FINISHED
    }
}

/// Per-ray progress of one scanner, indexed by (row, col)
#[derive(Clone, Debug)]
pub struct RayGrid {
    size: u16,
    entries: Vec<RayCacheEntry>,
}

impl RayGrid {
    pub fn new(size: u16, initial_distance: u32) -> Self {
        let size = size.max(1);
        Self {
            size,
            entries: vec![RayCacheEntry::fresh(initial_distance); size as usize * size as usize],
        }
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, row: u16, col: u16) -> Option<&RayCacheEntry> {
        if row >= self.size || col >= self.size {
            return None;
        }
        self.entries.get(row as usize * self.size as usize + col as usize)
    }

    pub fn reset(&mut self, initial_distance: u32) {
        self.entries.fill(RayCacheEntry::fresh(initial_distance));
    }

    pub fn finished_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_finished()).count()
    }

    /// True when every ray is back at the start
    pub fn is_pristine(&self, initial_distance: u32) -> bool {
        self.entries
            .iter()
            .all(|e| *e == RayCacheEntry::fresh(initial_distance))
    }
}

pub struct RayScanner {
    direction: Direction,
    grid: RayGrid,
    memo: HashMap<NodePos, bool>,
}

impl RayScanner {
    pub fn new(direction: Direction, grid_size: u16, initial_distance: u32) -> Self {
        Self {
            direction,
            grid: RayGrid::new(grid_size, initial_distance),
            memo: HashMap::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn grid(&self) -> &RayGrid {
        &self.grid
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Forget all ray progress and visibility answers
    pub fn reset(&mut self, grid_size: u16, initial_distance: u32) {
        if grid_size.max(1) != self.grid.size() {
            self.grid = RayGrid::new(grid_size, initial_distance);
        } else {
            self.grid.reset(initial_distance);
        }
        self.memo.clear();
    }

    /// Direction of the ray at (row, col), spread over a plane
    /// `distance_min / 2` in front of the viewer
    fn ray_direction(&self, row: u16, col: u16, distance_min: u32) -> Vec3 {
        let dir = self.direction.vector();
        let grid = self.grid.size() as i32;
        let spacing = distance_min as i32 / grid;
        let mut first = dir * (distance_min as i32 / 2);
        if dir.x == 0 {
            first.x += spacing * (col as i32 - grid / 2);
        }
        if dir.y == 0 {
            first.y += spacing * (row as i32 - grid / 2);
        }
        if dir.z == 0 {
            let along = if dir.y == 0 { col } else { row };
            first.z += spacing * (along as i32 - grid / 2);
        }
        first.as_vec3().normalize_or_zero()
    }

    /// Run one pass over every unfinished ray. Returns the number of march
    /// steps processed; zero means this direction is done.
    pub fn scan(
        &mut self,
        ctx: &ScanContext,
        oracle: &dyn VisibilityOracle,
        sink: &dyn FarBlockSink,
    ) -> u32 {
        let config = &ctx.config;
        let params = &config.params;
        let distance_min = config.distance_min;
        let origin = ctx.viewer_node.as_vec3();
        let start = origin + self.direction.vector().as_vec3() * (distance_min / 2) as f32;
        let limit = config.map_generation_limit as f32;
        let size = self.grid.size();

        let mut processed = 0u32;
        for index in 0..self.grid.len() {
            if self.grid.entries[index].distance_marched > ctx.distance_max {
                continue;
            }
            let row = (index / size as usize) as u16;
            let col = (index % size as usize) as u16;
            let ray = Ray::new(origin, self.ray_direction(row, col, distance_min));

            let entry = &mut self.grid.entries[index];
            let mut pos_last = start + ray.direction * entry.distance_marched as f32;
            for _ in 0..config.iteration_cap {
                entry.step_num += 1;
                let last_block = node_to_block(pos_last.floor().as_ivec3());
                let step = resolve_step(ctx.viewer_block, last_block, params);
                let width = ((BLOCK_SIZE as u32) << step) >> 1;
                entry.distance_marched = entry.distance_marched.saturating_add(width);
                let depth = entry.distance_marched;

                let pos = ray.at(depth as f32);
                pos_last = pos;

                let real_width = (BLOCK_SIZE << (step as u32 + params.cell_size_pow as u32)) as f32;
                if pos.cmplt(Vec3::splat(-limit)).any()
                    || (pos + Vec3::splat(real_width)).cmpgt(Vec3::splat(limit)).any()
                {
                    entry.distance_marched = RAY_FINISHED;
                    break;
                }
                processed += 1;

                let aligned = ray.aligned_at(depth as f32, (width >> 1) as i32);

                if depth >= config.min_streaming_range {
                    let visible = *self.memo.entry(aligned).or_insert_with(|| {
                        oracle.is_visible(aligned) || oracle.is_visible_at_water_level(aligned)
                    });
                    if visible {
                        if step > 0 {
                            emit_hit(node_to_block(aligned), step, ctx, sink);
                        }
                        entry.distance_marched = RAY_FINISHED;
                        break;
                    }
                }

                if radius_box(aligned, ctx.viewer_node) > ctx.distance_max as i32 {
                    break;
                }
            }
        }
        processed
    }
}

/// Hand a hit to the sink, with its face neighbours one cell away
fn emit_hit(pos: BlockPos, step: Step, ctx: &ScanContext, sink: &dyn FarBlockSink) {
    sink.on_visible(pos, ctx);
    if !ctx.config.fill_neighbors {
        return;
    }
    let width = ctx.config.params.base_cell() << step;
    for offset in FACE_NEIGHBORS {
        sink.on_visible(pos + offset * width, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::oracle::FlatWorld;
    use glam::IVec3;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        hits: Mutex<Vec<BlockPos>>,
    }

    impl FarBlockSink for RecordingSink {
        fn on_visible(&self, pos: BlockPos, _ctx: &ScanContext) {
            self.hits.lock().push(pos);
        }
    }

    fn config(grid_size: u16, render_range: u32) -> Arc<FarConfig> {
        Arc::new(FarConfig {
            grid_size,
            render_range,
            ..Default::default()
        })
    }

    #[test]
    fn test_grid_indexing() {
        let grid = RayGrid::new(4, 32);
        assert_eq!(grid.len(), 16);
        assert_eq!(grid.get(3, 3).unwrap().distance_marched, 32);
        assert!(grid.get(4, 0).is_none());
        assert!(grid.is_pristine(32));
    }

    #[test]
    fn test_center_ray_points_along_direction() {
        for dir in Direction::ALL {
            let scanner = RayScanner::new(dir, 8, 32);
            let v = scanner.ray_direction(4, 4, 144);
            assert!((v - dir.vector().as_vec3()).length() < 1e-6, "{:?}", dir);
        }
    }

    #[test]
    fn test_off_center_rays_spread() {
        let scanner = RayScanner::new(Direction::Bottom, 8, 32);
        let a = scanner.ray_direction(0, 0, 144);
        let b = scanner.ray_direction(7, 7, 144);
        assert!(a.y < 0.0 && b.y < 0.0);
        assert!(a.x < 0.0 && b.x > 0.0);
        assert!(a.z < 0.0 && b.z > 0.0);
    }

    #[test]
    fn test_flat_world_hit_from_above() {
        let config = config(8, 1024);
        let ctx = ScanContext::new(IVec3::new(0, 300, 0), 1, 0, config);
        let world = FlatWorld::new(0, -1000);
        let sink = RecordingSink::default();

        let mut scanner = RayScanner::new(Direction::Bottom, 8, 32);
        let processed = scanner.scan(&ctx, &world, &sink);
        assert!(processed > 0);
        assert!(scanner.grid().get(4, 4).unwrap().is_finished());

        let hits = sink.hits.lock();
        assert!(!hits.is_empty());
        // Self plus six neighbours per hit
        assert_eq!(hits.len() % 7, 0);
        assert!(hits[0].y <= 0);
        assert!(scanner.memo_len() > 0);
    }

    #[test]
    fn test_top_scanner_sees_nothing_and_finishes() {
        let config = config(4, 512);
        let ctx = ScanContext::new(IVec3::new(0, 300, 0), 1, 0, config);
        let world = FlatWorld::new(0, -1000);
        let sink = RecordingSink::default();

        let mut scanner = RayScanner::new(Direction::Top, 4, 32);
        let mut passes = 0;
        while scanner.scan(&ctx, &world, &sink) > 0 {
            passes += 1;
            assert!(passes < 50, "scanner never finished");
        }
        assert!(sink.hits.lock().is_empty());
    }

    #[test]
    fn test_no_neighbours_when_disabled() {
        let config = Arc::new(FarConfig {
            grid_size: 2,
            render_range: 1024,
            fill_neighbors: false,
            ..Default::default()
        });
        let ctx = ScanContext::new(IVec3::new(0, 300, 0), 1, 0, config);
        let world = FlatWorld::new(0, -1000);
        let sink = RecordingSink::default();

        let mut scanner = RayScanner::new(Direction::Bottom, 2, 32);
        scanner.scan(&ctx, &world, &sink);
        let hits = sink.hits.lock().len();
        assert!(hits > 0);
        assert!(hits <= 4);
    }

    #[test]
    fn test_map_limit_finishes_ray() {
        let config = config(2, 4096);
        let ctx = ScanContext::new(IVec3::new(31000, 0, 0), 1, 0, config);
        let world = FlatWorld::new(-20000, -20000);
        let sink = RecordingSink::default();

        let mut scanner = RayScanner::new(Direction::Right, 2, 32);
        scanner.scan(&ctx, &world, &sink);
        assert_eq!(scanner.grid().finished_count(), 4);
    }

    #[test]
    fn test_reset_clears_progress() {
        let config = config(4, 1024);
        let ctx = ScanContext::new(IVec3::new(0, 300, 0), 1, 0, config);
        let world = FlatWorld::new(0, -1000);
        let sink = RecordingSink::default();

        let mut scanner = RayScanner::new(Direction::Bottom, 4, 32);
        scanner.scan(&ctx, &world, &sink);
        assert!(!scanner.grid().is_pristine(32));

        scanner.reset(4, 32);
        assert!(scanner.grid().is_pristine(32));
        assert_eq!(scanner.memo_len(), 0);
    }
}
