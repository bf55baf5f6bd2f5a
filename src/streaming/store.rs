//! Far block storage shared by scanners, the fetch client and the mesher.
//!
//! Blocks live in one map per step, keyed by canonical block position. The
//! active map holds what the current pass has confirmed as needed, one block
//! per position whatever its step. Evicted and superseded blocks go through a
//! pending-delete list so that workers still holding an `Arc` finish before
//! the block is dropped from the main thread.

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::config::FarParams;
use crate::core::types::{BlockPos, MAX_STEP, Step};
use crate::streaming::lod::resolve_cell;
use crate::streaming::requests::RequestTable;
use crate::streaming::scanner::{FarBlockSink, ScanContext};
use crate::voxel::far_block::{FarBlock, FarKey};

type StepMap = HashMap<BlockPos, Arc<FarBlock>>;

/// Result of storing an arrived block
#[derive(Debug)]
pub enum InsertOutcome {
    /// No block existed at this key
    Inserted(Arc<FarBlock>),
    /// An older or equal iteration was replaced
    Replaced(Arc<FarBlock>),
    /// A newer iteration is already stored; the arrival was dropped
    Stale,
}

impl InsertOutcome {
    pub fn block(&self) -> Option<&Arc<FarBlock>> {
        match self {
            InsertOutcome::Inserted(block) | InsertOutcome::Replaced(block) => Some(block),
            InsertOutcome::Stale => None,
        }
    }
}

pub struct FarBlockStore {
    params: FarParams,
    steps: Vec<RwLock<StepMap>>,
    active: RwLock<HashMap<BlockPos, Arc<FarBlock>>>,
    pending_delete: Mutex<Vec<Arc<FarBlock>>>,
    requests: Arc<RequestTable>,
}

impl FarBlockStore {
    pub fn new(params: FarParams, requests: Arc<RequestTable>) -> Self {
        let steps = (0..=MAX_STEP).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            params,
            steps,
            active: RwLock::new(HashMap::new()),
            pending_delete: Mutex::new(Vec::new()),
            requests,
        }
    }

    pub fn params(&self) -> &FarParams {
        &self.params
    }

    pub fn requests(&self) -> &Arc<RequestTable> {
        &self.requests
    }

    fn step_map(&self, step: Step) -> Option<&RwLock<StepMap>> {
        self.steps.get(step as usize)
    }

    pub fn lookup(&self, pos: BlockPos, step: Step) -> Option<Arc<FarBlock>> {
        self.step_map(step)?.read().get(&pos).cloned()
    }

    /// Return the stored block and mark it active, or record a request.
    ///
    /// The active map is only updated if its lock is free; a skipped update
    /// is repeated by the next pass that reaches the same block. An active
    /// block of another step at the same position is superseded.
    pub fn materialize_or_request(
        &self,
        pos: BlockPos,
        step: Step,
        iteration: u32,
        now: u64,
    ) -> Option<Arc<FarBlock>> {
        let key = FarKey::new(pos, step);
        match self.lookup(pos, step) {
            Some(block) => {
                block.touch(now);
                if let Some(mut active) = self.active.try_write() {
                    let previous = active.insert(pos, block.clone());
                    if let Some(old) = previous.filter(|old| old.step != step) {
                        self.pending_delete.lock().push(old);
                    }
                }
                Some(block)
            }
            None => {
                if self.requests.request(key, iteration) {
                    trace!("Requested far block {:?} step {} (iteration {})", pos, step, iteration);
                }
                None
            }
        }
    }

    /// Store an arrived block unless a newer iteration is already present
    pub fn insert_or_replace(&self, block: FarBlock, now: u64) -> InsertOutcome {
        let Some(map) = self.step_map(block.step) else {
            return InsertOutcome::Stale;
        };
        let key = block.key();
        block.touch(now);

        let mut map = map.write();
        let previous = match map.get(&key.pos) {
            Some(existing) if existing.iteration > block.iteration => return InsertOutcome::Stale,
            Some(existing) => Some(existing.clone()),
            None => None,
        };

        let block = Arc::new(block);
        map.insert(key.pos, block.clone());
        drop(map);

        let superseded = self.active.write().insert(key.pos, block.clone());
        if let Some(old) = superseded.filter(|old| old.step != key.step) {
            self.pending_delete.lock().push(old);
        }

        match previous {
            Some(old) => {
                self.pending_delete.lock().push(old);
                InsertOutcome::Replaced(block)
            }
            None => InsertOutcome::Inserted(block),
        }
    }

    /// Drop blocks not touched since `threshold` and deactivate blocks not
    /// touched since `confirmed_since`. Returns the number of blocks evicted.
    pub fn evict_older_than(&self, threshold: u64, confirmed_since: u64) -> usize {
        let mut evicted = Vec::new();
        for map in &self.steps {
            let mut map = map.write();
            map.retain(|_, block| {
                if block.last_touched() < threshold {
                    evicted.push(block.clone());
                    false
                } else {
                    true
                }
            });
        }

        self.active
            .write()
            .retain(|_, block| block.last_touched() >= confirmed_since);

        let count = evicted.len();
        if count > 0 {
            debug!("Evicted {} far blocks older than {}s", count, threshold);
            self.pending_delete.lock().extend(evicted);
        }
        count
    }

    /// Release evicted blocks nobody else holds. Returns how many were freed.
    pub fn purge_pending_delete(&self) -> usize {
        let mut pending = self.pending_delete.lock();
        let before = pending.len();
        pending.retain(|block| Arc::strong_count(block) > 1);
        before - pending.len()
    }

    pub fn pending_delete_len(&self) -> usize {
        self.pending_delete.lock().len()
    }

    /// Blocks stored across all steps
    pub fn len(&self) -> usize {
        self.steps.iter().map(|map| map.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_at(&self, step: Step) -> usize {
        self.step_map(step).map(|map| map.read().len()).unwrap_or(0)
    }

    pub fn active_len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_active(&self, key: FarKey) -> bool {
        self.active
            .read()
            .get(&key.pos)
            .is_some_and(|block| block.step == key.step)
    }

    /// Snapshot of the active blocks
    pub fn active_blocks(&self) -> Vec<Arc<FarBlock>> {
        self.active.read().values().cloned().collect()
    }

    /// Drop every stored block
    pub fn clear(&self) {
        let mut released = Vec::new();
        for map in &self.steps {
            released.extend(map.write().drain().map(|(_, block)| block));
        }
        self.active.write().clear();
        self.pending_delete.lock().extend(released);
    }
}

impl FarBlockSink for FarBlockStore {
    fn on_visible(&self, pos: BlockPos, ctx: &ScanContext) {
        let cell = resolve_cell(ctx.viewer_block, pos, &self.params);
        let step = cell.step(&self.params);
        // Step 0 is covered by regular map blocks
        if step == 0 {
            return;
        }
        self.materialize_or_request(cell.origin, step, ctx.iteration, ctx.now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::requests::RequestStatus;
    use crate::voxel::node::{Node, content};
    use glam::IVec3;

    fn store() -> FarBlockStore {
        FarBlockStore::new(FarParams::default(), Arc::new(RequestTable::new()))
    }

    fn block(x: i32, step: Step, iteration: u32) -> FarBlock {
        FarBlock::uniform(IVec3::new(x, 0, 0), step, iteration, Node::new(content::STONE), 0, 0)
    }

    #[test]
    fn test_miss_records_request() {
        let store = store();
        assert!(store.materialize_or_request(IVec3::new(8, 0, 0), 2, 1, 0).is_none());
        let key = FarKey::new(IVec3::new(8, 0, 0), 2);
        assert_eq!(store.requests().status(key), Some(RequestStatus::Unsent));
    }

    #[test]
    fn test_hit_touches_and_activates() {
        let store = store();
        store.insert_or_replace(block(8, 2, 1), 3);
        let found = store.materialize_or_request(IVec3::new(8, 0, 0), 2, 1, 7).unwrap();
        assert_eq!(found.last_touched(), 7);
        assert!(store.is_active(found.key()));
        assert_eq!(store.active_len(), 1);
    }

    #[test]
    fn test_older_iteration_is_stale() {
        let store = store();
        assert!(matches!(store.insert_or_replace(block(8, 2, 5), 0), InsertOutcome::Inserted(_)));
        assert!(matches!(store.insert_or_replace(block(8, 2, 4), 0), InsertOutcome::Stale));
        assert_eq!(store.lookup(IVec3::new(8, 0, 0), 2).unwrap().iteration, 5);

        assert!(matches!(store.insert_or_replace(block(8, 2, 6), 0), InsertOutcome::Replaced(_)));
        assert_eq!(store.lookup(IVec3::new(8, 0, 0), 2).unwrap().iteration, 6);
        assert_eq!(store.len(), 1);
        assert_eq!(store.pending_delete_len(), 1);
    }

    #[test]
    fn test_new_step_supersedes_active_block() {
        let store = store();
        store.insert_or_replace(block(0, 1, 1), 0);
        store.insert_or_replace(block(0, 2, 2), 0);
        assert_eq!(store.active_len(), 1);
        assert_eq!(store.pending_delete_len(), 1);
        assert!(store.is_active(FarKey::new(IVec3::ZERO, 2)));
        assert!(!store.is_active(FarKey::new(IVec3::ZERO, 1)));

        // A scan confirming the step 1 block swaps it back in
        let found = store.materialize_or_request(IVec3::ZERO, 1, 3, 1).unwrap();
        assert_eq!(found.step, 1);
        assert_eq!(store.active_len(), 1);
        assert!(store.is_active(FarKey::new(IVec3::ZERO, 1)));
        assert_eq!(store.pending_delete_len(), 2);

        // Both are still held by the step maps
        assert_eq!(store.purge_pending_delete(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_evict_and_purge() {
        let store = store();
        store.insert_or_replace(block(0, 1, 0), 10);
        store.insert_or_replace(block(2, 1, 0), 50);
        assert_eq!(store.active_len(), 2);

        assert_eq!(store.evict_older_than(20, 40), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_len(), 1);
        assert!(store.lookup(IVec3::new(0, 0, 0), 1).is_none());

        assert_eq!(store.purge_pending_delete(), 1);
        assert_eq!(store.pending_delete_len(), 0);
    }

    #[test]
    fn test_purge_keeps_held_blocks() {
        let store = store();
        store.insert_or_replace(block(0, 1, 0), 0);
        let held = store.lookup(IVec3::new(0, 0, 0), 1).unwrap();
        store.evict_older_than(5, 5);
        assert_eq!(store.purge_pending_delete(), 0);
        drop(held);
        assert_eq!(store.purge_pending_delete(), 1);
    }

    #[test]
    fn test_clear() {
        let store = store();
        store.insert_or_replace(block(0, 1, 0), 0);
        store.insert_or_replace(block(0, 3, 0), 0);
        assert_eq!(store.len_at(3), 1);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.active_len(), 0);
    }

    #[test]
    fn test_sink_canonicalizes_and_skips_step_zero() {
        let store = store();
        let params = *store.params();
        let ctx = ScanContext {
            viewer_node: IVec3::ZERO,
            viewer_block: IVec3::ZERO,
            distance_max: 4096,
            iteration: 3,
            now: 0,
            config: Arc::new(crate::core::config::FarConfig::default()),
        };

        // Right next to the viewer: step 0, nothing requested
        store.on_visible(IVec3::new(1, 0, 0), &ctx);
        assert!(store.requests().is_empty());

        let far = IVec3::new(1000, 3, -700);
        store.on_visible(far, &ctx);
        let cell = resolve_cell(IVec3::ZERO, far, &params);
        let key = FarKey::new(cell.origin, cell.step(&params));
        assert_eq!(store.requests().get(key).unwrap().iteration, 3);
        assert_eq!(store.requests().len(), 1);
    }
}
