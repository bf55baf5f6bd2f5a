//! Drives the six ray scanners from the main tick.
//!
//! `tick` never blocks: it snapshots the viewer, submits scan lanes to the
//! worker pool and returns. A lane whose last pass processed nothing is done;
//! when all six are done the pass is complete and stale blocks are evicted.

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::core::config::FarConfig;
use crate::core::time::PassTimer;
use crate::core::types::{BlockPos, NodePos};
use crate::math::Direction;
use crate::streaming::executor::WorkerPool;
use crate::streaming::scanner::{RayScanner, ScanContext};
use crate::streaming::store::FarBlockStore;
use crate::terrain::oracle::VisibilityOracle;

/// Lane has not run since the last reset
const NEVER_RAN: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// Caches were just reset; scanning starts next tick
    Idle,
    Scanning,
    /// Every lane finished; nothing to do until the viewer moves
    Complete,
}

struct Lane {
    scanner: Arc<Mutex<RayScanner>>,
    processed: Arc<AtomicI64>,
    in_flight: Arc<AtomicBool>,
}

impl Lane {
    fn new(direction: Direction, config: &FarConfig) -> Self {
        Self {
            scanner: Arc::new(Mutex::new(RayScanner::new(
                direction,
                config.grid_size,
                config.initial_distance,
            ))),
            processed: Arc::new(AtomicI64::new(NEVER_RAN)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn needs_work(&self) -> bool {
        self.processed.load(Ordering::Acquire) != 0
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

pub struct ScanScheduler {
    config: Arc<FarConfig>,
    oracle: Arc<dyn VisibilityOracle>,
    store: Arc<FarBlockStore>,
    pool: Arc<WorkerPool>,
    lanes: Vec<Lane>,
    state: ScanState,
    iteration: u32,
    last_viewer: Option<BlockPos>,
    last_distance_max: u32,
    force_invalidate: bool,
    pass_started: u64,
    last_complete: Option<u64>,
    pass_timer: Option<PassTimer>,
}

impl ScanScheduler {
    pub fn new(
        config: Arc<FarConfig>,
        oracle: Arc<dyn VisibilityOracle>,
        store: Arc<FarBlockStore>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let lanes = Direction::ALL.iter().map(|d| Lane::new(*d, &config)).collect();
        Self {
            config,
            oracle,
            store,
            pool,
            lanes,
            state: ScanState::Idle,
            iteration: 0,
            last_viewer: None,
            last_distance_max: 0,
            force_invalidate: false,
            pass_started: 0,
            last_complete: None,
            pass_timer: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn last_complete(&self) -> Option<u64> {
        self.last_complete
    }

    pub fn config(&self) -> &Arc<FarConfig> {
        &self.config
    }

    pub fn lanes_in_flight(&self) -> usize {
        self.lanes.iter().filter(|l| l.is_in_flight()).count()
    }

    /// Reset every cache on the next tick
    pub fn request_invalidate(&mut self) {
        self.force_invalidate = true;
    }

    /// Change the render range. Growing it rescans on the next tick.
    pub fn set_render_range(&mut self, render_range: u32) {
        if self.config.render_range != render_range {
            Arc::make_mut(&mut self.config).render_range = render_range;
        }
    }

    /// Inspect one scanner
    pub fn with_scanner<R>(&self, direction: Direction, f: impl FnOnce(&RayScanner) -> R) -> R {
        let lane = &self.lanes[direction.index()];
        let scanner = lane.scanner.lock();
        f(&scanner)
    }

    /// Advance scanning for a viewer at `viewer` (nodes) at uptime `now`
    pub fn tick(&mut self, viewer: NodePos, now: u64) -> ScanState {
        if self.lanes.iter().any(Lane::is_in_flight) {
            return self.state;
        }

        let ctx = ScanContext::new(viewer, self.iteration, now, self.config.clone());
        let moved = self.last_viewer != Some(ctx.viewer_block);
        let grew = ctx.distance_max > self.last_distance_max;
        if moved || grew || self.force_invalidate {
            self.invalidate(&ctx, now);
            return self.state;
        }

        let mut dispatched = 0;
        for lane in self.lanes.iter().filter(|l| l.needs_work()) {
            lane.in_flight.store(true, Ordering::Release);
            let scanner = lane.scanner.clone();
            let processed = lane.processed.clone();
            let in_flight = lane.in_flight.clone();
            let oracle = self.oracle.clone();
            let store = self.store.clone();
            let ctx = ctx.clone();
            let submitted = self.pool.try_spawn(move || {
                let n = scanner.lock().scan(&ctx, oracle.as_ref(), store.as_ref());
                processed.store(n as i64, Ordering::Release);
                in_flight.store(false, Ordering::Release);
            });
            if submitted {
                dispatched += 1;
            } else {
                lane.in_flight.store(false, Ordering::Release);
            }
        }

        if dispatched > 0 || self.lanes.iter().any(Lane::needs_work) {
            self.state = ScanState::Scanning;
            return self.state;
        }

        if self.state != ScanState::Complete {
            self.complete(now);
        }
        self.store.purge_pending_delete();
        self.state
    }

    fn invalidate(&mut self, ctx: &ScanContext, now: u64) {
        for lane in &self.lanes {
            lane.scanner
                .lock()
                .reset(self.config.grid_size, self.config.initial_distance);
            lane.processed.store(NEVER_RAN, Ordering::Release);
        }
        let superseded = self.store.requests().supersede_in_flight();
        self.iteration = self.iteration.wrapping_add(1);
        self.last_viewer = Some(ctx.viewer_block);
        self.last_distance_max = ctx.distance_max;
        self.force_invalidate = false;
        self.pass_started = now;
        self.pass_timer = Some(PassTimer::start());
        self.state = ScanState::Idle;
        debug!(
            "Far scan invalidated at {:?} (iteration {}, {} requests superseded)",
            ctx.viewer_block, self.iteration, superseded
        );
    }

    fn complete(&mut self, now: u64) {
        self.last_complete = Some(now);
        // Never evict what this pass touched
        let threshold = now
            .saturating_sub(self.config.clean_old_secs)
            .min(self.pass_started);
        let evicted = self.store.evict_older_than(threshold, self.pass_started);
        let purged = self.store.purge_pending_delete();
        let ms = self.pass_timer.take().map(|t| t.ms()).unwrap_or(0.0);
        info!(
            "Far scan pass {} complete in {:.1}ms: {} blocks, {} active, {} evicted, {} freed",
            self.iteration,
            ms,
            self.store.len(),
            self.store.active_len(),
            evicted,
            purged
        );
        self.state = ScanState::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::requests::RequestTable;
    use crate::terrain::oracle::FlatWorld;
    use crate::voxel::far_block::FarBlock;
    use crate::voxel::node::Node;
    use glam::IVec3;
    use std::time::Duration;

    fn scheduler(render_range: u32) -> ScanScheduler {
        let config = Arc::new(FarConfig {
            grid_size: 4,
            render_range,
            workers: 2,
            ..Default::default()
        });
        let store = Arc::new(FarBlockStore::new(config.params, Arc::new(RequestTable::new())));
        let pool = Arc::new(WorkerPool::new(2, 16).unwrap());
        ScanScheduler::new(config, Arc::new(FlatWorld::new(0, -1000)), store, pool)
    }

    fn run_until_complete(scheduler: &mut ScanScheduler, viewer: IVec3, now: u64) {
        for _ in 0..200 {
            if scheduler.tick(viewer, now) == ScanState::Complete {
                return;
            }
            scheduler.pool.wait_idle(Duration::from_secs(5));
        }
        panic!("scan never completed");
    }

    fn all_pristine(scheduler: &ScanScheduler) -> bool {
        let initial = scheduler.config.initial_distance;
        Direction::ALL.iter().all(|d| {
            scheduler.with_scanner(*d, |s| s.grid().is_pristine(initial) && s.memo_len() == 0)
        })
    }

    #[test]
    fn test_first_tick_invalidates_without_dispatch() {
        let mut scheduler = scheduler(1024);
        assert_eq!(scheduler.tick(IVec3::new(0, 300, 0), 0), ScanState::Idle);
        assert_eq!(scheduler.iteration(), 1);
        assert_eq!(scheduler.lanes_in_flight(), 0);
        assert!(all_pristine(&scheduler));
    }

    #[test]
    fn test_pass_completes_and_requests_blocks() {
        let mut scheduler = scheduler(1024);
        let viewer = IVec3::new(0, 300, 0);
        run_until_complete(&mut scheduler, viewer, 1);
        assert_eq!(scheduler.last_complete(), Some(1));
        assert!(!scheduler.store.requests().is_empty());

        // Nothing changes: stays complete
        assert_eq!(scheduler.tick(viewer, 2), ScanState::Complete);
        assert_eq!(scheduler.iteration(), 1);
    }

    #[test]
    fn test_viewer_jump_resets_all_caches() {
        let mut scheduler = scheduler(1024);
        run_until_complete(&mut scheduler, IVec3::new(0, 300, 0), 1);
        assert!(!all_pristine(&scheduler));
        let requested = scheduler.store.requests().len();
        assert!(requested > 0);

        let state = scheduler.tick(IVec3::new(5000, 300, -5000), 2);
        assert_eq!(state, ScanState::Idle);
        assert_eq!(scheduler.iteration(), 2);
        assert!(all_pristine(&scheduler));
        // Unsent requests from the old position are dropped
        assert_eq!(scheduler.store.requests().unsent_len(), 0);
    }

    #[test]
    fn test_small_move_within_cell_keeps_caches() {
        let mut scheduler = scheduler(1024);
        run_until_complete(&mut scheduler, IVec3::new(0, 300, 0), 1);
        // Same aligned block
        assert_eq!(scheduler.tick(IVec3::new(3, 301, 2), 2), ScanState::Complete);
        assert_eq!(scheduler.iteration(), 1);
    }

    #[test]
    fn test_growing_range_rescans() {
        let mut scheduler = scheduler(512);
        let viewer = IVec3::new(0, 300, 0);
        run_until_complete(&mut scheduler, viewer, 1);

        scheduler.set_render_range(2048);
        assert_eq!(scheduler.tick(viewer, 2), ScanState::Idle);
        assert_eq!(scheduler.iteration(), 2);

        // Shrinking does not
        run_until_complete(&mut scheduler, viewer, 3);
        scheduler.set_render_range(256);
        assert_eq!(scheduler.tick(viewer, 4), ScanState::Complete);
    }

    #[test]
    fn test_long_pass_keeps_blocks_touched_since_start() {
        let mut scheduler = scheduler(1024);
        let viewer = IVec3::new(0, 300, 0);
        let store = scheduler.store.clone();
        // Far above the flat ground, no ray reaches these
        let confirmed = IVec3::new(0, 4000, 0);
        let stale = IVec3::new(64, 4000, 0);
        store.insert_or_replace(FarBlock::uniform(confirmed, 1, 0, Node::AIR, 0, 0), 5);
        store.insert_or_replace(FarBlock::uniform(stale, 1, 0, Node::AIR, 0, 0), 1);

        assert_eq!(scheduler.tick(viewer, 5), ScanState::Idle);
        // Completes long after clean_old_secs have passed
        run_until_complete(&mut scheduler, viewer, 50);

        assert!(store.lookup(confirmed, 1).is_some());
        assert!(store.lookup(stale, 1).is_none());
    }

    #[test]
    fn test_forced_invalidate() {
        let mut scheduler = scheduler(1024);
        let viewer = IVec3::new(0, 300, 0);
        run_until_complete(&mut scheduler, viewer, 1);
        scheduler.request_invalidate();
        assert_eq!(scheduler.tick(viewer, 2), ScanState::Idle);
        assert!(all_pristine(&scheduler));
    }
}
