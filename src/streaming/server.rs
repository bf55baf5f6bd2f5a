//! Far block server: answers `GetBlocks` from memory, per-step tier
//! databases and, failing those, the terrain generator.

use farmesh_net::{
    BlockKey, ClientMessage, DrawControl, FarHandler, PROTOCOL_VERSION, PeerId, ServerMessage,
};
use glam::IVec3;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::config::FarParams;
use crate::core::types::{BLOCK_SIZE, MAP_GENERATION_LIMIT, Step};
use crate::streaming::disk_io::block_to_wire;
use crate::streaming::tier_db::{TierDatabase, TierProvider};
use crate::terrain::generator::TerrainGenerator;
use crate::voxel::far_block::{FarBlock, FarKey};

enum TierSlot {
    Open(Arc<dyn TierDatabase>),
    /// Opening failed once; never retried this session
    Failed,
}

#[derive(Default)]
struct Session {
    draw_control: DrawControl,
    changed: u32,
    all_changed_pending: bool,
}

/// Outcome of looking up one block
enum Served {
    Block(Arc<FarBlock>),
    Unavailable { permanent: bool },
}

/// Blocks kept in memory unless configured otherwise
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

pub struct FarBlockServer {
    params: FarParams,
    provider: Arc<dyn TierProvider>,
    generator: Option<Arc<TerrainGenerator>>,
    map_generation_limit: i32,
    /// Least recently served blocks are dropped beyond this
    cache_capacity: usize,
    cache: RwLock<HashMap<FarKey, Arc<FarBlock>>>,
    /// Serve counter used as the cache touch stamp
    clock: AtomicU64,
    tiers: Mutex<HashMap<Step, TierSlot>>,
    sessions: Mutex<HashMap<PeerId, Session>>,
}

impl FarBlockServer {
    pub fn new(
        params: FarParams,
        provider: Arc<dyn TierProvider>,
        generator: Option<Arc<TerrainGenerator>>,
    ) -> Self {
        Self {
            params,
            provider,
            generator,
            map_generation_limit: MAP_GENERATION_LIMIT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            tiers: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Refuse blocks lying entirely outside `±limit` nodes
    pub fn with_map_generation_limit(mut self, limit: i32) -> Self {
        self.map_generation_limit = limit;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_cached(&self, key: FarKey) -> bool {
        self.cache.read().contains_key(&key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Draw control last sent by a peer
    pub fn draw_control(&self, peer: PeerId) -> Option<DrawControl> {
        self.sessions.lock().get(&peer).map(|s| s.draw_control)
    }

    /// Tier database for `step`, opened on first use
    fn tier(&self, step: Step) -> Option<Arc<dyn TierDatabase>> {
        let mut tiers = self.tiers.lock();
        match tiers.get(&step) {
            Some(TierSlot::Open(db)) => return Some(db.clone()),
            Some(TierSlot::Failed) => return None,
            None => {}
        }
        match self.provider.open(step) {
            Ok(db) => {
                tiers.insert(step, TierSlot::Open(db.clone()));
                Some(db)
            }
            Err(e) => {
                warn!("Far tier {} unavailable for this session: {}", step, e);
                tiers.insert(step, TierSlot::Failed);
                None
            }
        }
    }

    /// True when the block overlaps the generated part of the map
    fn within_map(&self, key: FarKey) -> bool {
        let size = (BLOCK_SIZE as i64) << (self.params.cell_size_pow as u32 + key.step as u32);
        let limit = self.map_generation_limit as i64;
        let min = key.pos.as_i64vec3() * BLOCK_SIZE as i64;
        (0..3).all(|axis| min[axis] <= limit && min[axis] + size > -limit)
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn serve(&self, key: FarKey, iteration: u32) -> Served {
        if key.step > self.params.step_cap {
            return Served::Unavailable { permanent: true };
        }
        if !self.within_map(key) {
            debug!("Refusing far block {:?} step {} outside the map", key.pos, key.step);
            return Served::Unavailable { permanent: true };
        }
        if let Some(block) = self.cache.read().get(&key) {
            block.touch(self.next_tick());
            return Served::Block(block.clone());
        }

        let Some(tier) = self.tier(key.step) else {
            return Served::Unavailable { permanent: true };
        };

        match tier.load_block(key.pos) {
            Ok(Some(block)) => return Served::Block(self.remember(block)),
            Ok(None) => {}
            Err(e) => error!("Failed to load far block {:?} step {}: {}", key.pos, key.step, e),
        }

        let Some(generator) = &self.generator else {
            return Served::Unavailable { permanent: false };
        };
        let block = generator.generate_block(key.pos, key.step, iteration, &self.params);
        if let Err(e) = tier.save_block(&block) {
            error!("Failed to save far block {:?} step {}: {}", key.pos, key.step, e);
        }
        Served::Block(self.remember(block))
    }

    fn remember(&self, block: FarBlock) -> Arc<FarBlock> {
        block.touch(self.next_tick());
        let block = Arc::new(block);
        let mut cache = self.cache.write();
        cache.insert(block.key(), block.clone());

        if cache.len() > self.cache_capacity {
            // Shrink to seven eighths of capacity
            let target = self.cache_capacity - self.cache_capacity / 8;
            let mut by_age: Vec<(u64, FarKey)> = cache
                .iter()
                .map(|(key, block)| (block.last_touched(), *key))
                .collect();
            by_age.sort_unstable_by_key(|(touched, _)| *touched);
            let excess = cache.len() - target;
            for (_, key) in by_age.into_iter().take(excess) {
                cache.remove(&key);
            }
            trace!("Dropped {} far blocks from the server cache", excess);
        }
        block
    }

    fn get_blocks(&self, blocks: &[BlockKey]) -> Vec<ServerMessage> {
        let mut responses = Vec::with_capacity(blocks.len());
        for request in blocks {
            let key = FarKey::new(IVec3::from_array(request.pos), request.step);
            match self.serve(key, request.iteration) {
                Served::Block(block) => match block_to_wire(&block) {
                    Ok(mut data) => {
                        data.iteration = request.iteration;
                        responses.push(ServerMessage::BlockData(data));
                    }
                    Err(e) => {
                        error!("Failed to encode far block {:?}: {}", key.pos, e);
                        responses.push(ServerMessage::unavailable(request.pos, request.step, false));
                    }
                },
                Served::Unavailable { permanent } => {
                    responses.push(ServerMessage::unavailable(request.pos, request.step, permanent));
                }
            }
        }
        responses
    }

    /// Count changed blocks against every session's all-changed threshold.
    ///
    /// Sessions that reach their threshold get `AllChanged` ahead of their
    /// next response and the block cache is dropped.
    pub fn record_block_changes(&self, count: u32) {
        let mut reached = false;
        for (peer, session) in self.sessions.lock().iter_mut() {
            let threshold = session.draw_control.all_changed;
            if threshold == 0 {
                continue;
            }
            session.changed = session.changed.saturating_add(count);
            if session.changed >= threshold {
                debug!("Far client {} reached {} changed blocks", peer, session.changed);
                session.changed = 0;
                session.all_changed_pending = true;
                reached = true;
            }
        }
        if reached {
            self.cache.write().clear();
        }
    }
}

impl FarHandler for FarBlockServer {
    fn handle_message(&self, peer: PeerId, msg: ClientMessage) -> Vec<ServerMessage> {
        let mut responses = Vec::new();
        {
            let mut sessions = self.sessions.lock();
            let session = sessions.entry(peer).or_default();
            if session.all_changed_pending {
                session.all_changed_pending = false;
                responses.push(ServerMessage::AllChanged);
            }
        }

        match msg {
            ClientMessage::Init { version } => {
                if version != PROTOCOL_VERSION {
                    warn!("Far client {} speaks protocol {}, expected {}", peer, version, PROTOCOL_VERSION);
                    responses.push(ServerMessage::error(format!(
                        "protocol version {} not supported (server {})",
                        version, PROTOCOL_VERSION
                    )));
                } else {
                    info!("Far client {} initialised", peer);
                }
            }
            ClientMessage::GetBlocks { blocks } => {
                debug!("Far client {} requested {} blocks", peer, blocks.len());
                responses.extend(self.get_blocks(&blocks));
            }
            ClientMessage::DrawControl(draw_control) => {
                if let Some(session) = self.sessions.lock().get_mut(&peer) {
                    session.draw_control = draw_control;
                }
            }
            ClientMessage::Ping => responses.push(ServerMessage::Pong),
        }
        responses
    }

    fn peer_disconnected(&self, peer: PeerId) {
        self.sessions.lock().remove(&peer);
    }
}
