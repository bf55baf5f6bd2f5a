//! Client side of the far block protocol.
//!
//! The scan path only records requests. `FetchClient::flush` turns them into
//! `GetBlocks` messages, `poll` drains the responses into the store and hands
//! fresh blocks to the mesh consumer on the worker pool. Without a server,
//! `LocalFarSource` satisfies the same requests from the terrain generator.

use farmesh_net::{
    BlockKey, ClientMessage, DrawControl, FarConnection, FarHandler, PROTOCOL_VERSION, PeerId,
    ServerMessage,
};
use glam::IVec3;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::config::FarConfig;
use crate::core::error::Error;
use crate::core::types::{BlockPos, Result};
use crate::streaming::disk_io::block_from_wire;
use crate::streaming::executor::WorkerPool;
use crate::streaming::requests::RequestStatus;
use crate::streaming::store::FarBlockStore;
use crate::terrain::generator::TerrainGenerator;
use crate::voxel::far_block::{FarBlock, FarKey, MeshHandle};

/// Message channel to a far block server
pub trait FarTransport: Send {
    fn send(&self, msg: ClientMessage) -> Result<()>;

    /// Next received message, without blocking
    fn try_recv(&mut self) -> Option<ServerMessage>;
}

impl FarTransport for FarConnection {
    fn send(&self, msg: ClientMessage) -> Result<()> {
        FarConnection::send(self, msg).map_err(Error::from)
    }

    fn try_recv(&mut self) -> Option<ServerMessage> {
        FarConnection::try_recv(self)
    }
}

/// In-process transport answering through a handler on the calling thread
pub struct LoopbackTransport {
    handler: Arc<dyn FarHandler>,
    peer: PeerId,
    inbox: Mutex<VecDeque<ServerMessage>>,
}

impl LoopbackTransport {
    pub fn new(handler: Arc<dyn FarHandler>) -> Self {
        Self {
            handler,
            peer: 1,
            inbox: Mutex::new(VecDeque::new()),
        }
    }
}

impl FarTransport for LoopbackTransport {
    fn send(&self, msg: ClientMessage) -> Result<()> {
        let responses = self.handler.handle_message(self.peer, msg);
        self.inbox.lock().extend(responses);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<ServerMessage> {
        self.inbox.get_mut().pop_front()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.handler.peer_disconnected(self.peer);
    }
}

/// Builds renderable meshes for materialized far blocks
pub trait MeshConsumer: Send + Sync {
    fn build_mesh(&self, block: Arc<FarBlock>) -> MeshHandle;
}

fn spawn_mesh(pool: &WorkerPool, mesher: &Arc<dyn MeshConsumer>, block: Arc<FarBlock>) {
    let mesher = mesher.clone();
    pool.spawn(move || {
        let handle = mesher.build_mesh(block.clone());
        block.set_mesh(handle);
    });
}

/// Counters reported by the CLI
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub sent: usize,
    pub received: usize,
    pub stale: usize,
    pub unavailable: usize,
    pub dropped: usize,
}

pub struct FetchClient {
    config: Arc<FarConfig>,
    store: Arc<FarBlockStore>,
    pool: Arc<WorkerPool>,
    mesher: Option<Arc<dyn MeshConsumer>>,
    invalidate: bool,
    stats: FetchStats,
}

impl FetchClient {
    pub fn new(
        config: Arc<FarConfig>,
        store: Arc<FarBlockStore>,
        pool: Arc<WorkerPool>,
        mesher: Option<Arc<dyn MeshConsumer>>,
    ) -> Self {
        Self {
            config,
            store,
            pool,
            mesher,
            invalidate: false,
            stats: FetchStats::default(),
        }
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    /// Announce the protocol revision
    pub fn init(&self, transport: &dyn FarTransport) -> Result<()> {
        transport.send(ClientMessage::Init {
            version: PROTOCOL_VERSION,
        })
    }

    /// Tell the server where the viewer is and when to resend everything
    pub fn draw_control(
        &self,
        transport: &dyn FarTransport,
        viewer: BlockPos,
        all_changed: u32,
    ) -> Result<()> {
        transport.send(ClientMessage::DrawControl(DrawControl {
            viewer: viewer.to_array(),
            range: self.config.render_range,
            farmesh: true,
            quality: self.config.params.quality,
            all_changed,
        }))
    }

    /// Send one batch of unsent requests. Returns how many keys were sent.
    pub fn flush(&mut self, transport: &dyn FarTransport) -> Result<usize> {
        let taken = self.store.requests().take_unsent(self.config.flush_batch_max);
        if taken.is_empty() {
            return Ok(0);
        }
        let blocks = taken
            .iter()
            .map(|(key, iteration)| BlockKey {
                pos: key.pos.to_array(),
                step: key.step,
                iteration: *iteration,
            })
            .collect();
        if let Err(e) = transport.send(ClientMessage::GetBlocks { blocks }) {
            self.store.requests().requeue(&taken);
            return Err(e);
        }
        self.stats.sent += taken.len();
        debug!("Requested {} far blocks", taken.len());
        Ok(taken.len())
    }

    /// Drain every message waiting on the transport
    pub fn poll(&mut self, transport: &mut dyn FarTransport, now: u64) -> usize {
        let mut handled = 0;
        while let Some(msg) = transport.try_recv() {
            self.on_message(msg, now);
            handled += 1;
        }
        handled
    }

    pub fn on_message(&mut self, msg: ServerMessage, now: u64) {
        match msg {
            ServerMessage::BlockData(data) => {
                let key = FarKey::new(IVec3::from_array(data.pos), data.step);
                let block = match block_from_wire(&data) {
                    Ok(block) => block,
                    Err(e) => {
                        warn!("Dropping far block {:?} step {}: {}", key.pos, key.step, e);
                        self.store.requests().clear(key);
                        self.stats.dropped += 1;
                        return;
                    }
                };
                let superseded = matches!(
                    self.store.requests().complete(key),
                    Some(pending) if pending.status == RequestStatus::Superseded
                );
                self.stats.received += 1;
                let outcome = self.store.insert_or_replace(block, now);
                match (outcome.block(), &self.mesher) {
                    (Some(block), Some(mesher)) if !superseded => {
                        spawn_mesh(&self.pool, mesher, block.clone());
                    }
                    (None, _) => self.stats.stale += 1,
                    _ => {}
                }
            }
            ServerMessage::BlockUnavailable {
                pos,
                step,
                permanent,
            } => {
                let key = FarKey::new(IVec3::from_array(pos), step);
                self.stats.unavailable += 1;
                if permanent {
                    debug!("Far block {:?} step {} permanently unavailable", key.pos, step);
                    self.store.requests().fail_permanently(key);
                } else {
                    self.store.requests().clear(key);
                }
            }
            ServerMessage::AllChanged => {
                info!("Server reported all far blocks changed");
                self.store.requests().reset();
                self.store.clear();
                self.invalidate = true;
            }
            ServerMessage::Pong => debug!("Far server pong"),
            ServerMessage::Error { message } => warn!("Far server error: {}", message),
        }
    }

    /// True once after the server asked for everything to be rescanned
    pub fn take_invalidate(&mut self) -> bool {
        std::mem::take(&mut self.invalidate)
    }
}

/// Satisfies far block requests by generating them locally
pub struct LocalFarSource {
    config: Arc<FarConfig>,
    generator: Arc<TerrainGenerator>,
    store: Arc<FarBlockStore>,
    pool: Arc<WorkerPool>,
    mesher: Option<Arc<dyn MeshConsumer>>,
}

impl LocalFarSource {
    pub fn new(
        config: Arc<FarConfig>,
        generator: Arc<TerrainGenerator>,
        store: Arc<FarBlockStore>,
        pool: Arc<WorkerPool>,
        mesher: Option<Arc<dyn MeshConsumer>>,
    ) -> Self {
        Self {
            config,
            generator,
            store,
            pool,
            mesher,
        }
    }

    /// Submit up to one batch of pending requests for generation
    pub fn pump(&self, now: u64) -> usize {
        let taken = self.store.requests().take_unsent(self.config.flush_batch_max);
        for (key, iteration) in &taken {
            let (key, iteration) = (*key, *iteration);
            let generator = self.generator.clone();
            let store = self.store.clone();
            let params = self.config.params;
            let pool = self.pool.clone();
            let mesher = self.mesher.clone();
            self.pool.spawn(move || {
                let block = generator.generate_block(key.pos, key.step, iteration, &params);
                let superseded = matches!(
                    store.requests().complete(key),
                    Some(pending) if pending.status == RequestStatus::Superseded
                );
                let outcome = store.insert_or_replace(block, now);
                if let (Some(block), Some(mesher)) = (outcome.block(), &mesher) {
                    if !superseded {
                        spawn_mesh(&pool, mesher, block.clone());
                    }
                }
            });
        }
        taken.len()
    }
}
