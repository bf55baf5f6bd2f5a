//! Far block streaming: LOD resolution, ray scanning, storage and transport

pub mod lod;
pub mod disk_io;
pub mod requests;
pub mod store;
pub mod executor;
pub mod scanner;
pub mod scheduler;
pub mod tier_db;
pub mod server;
pub mod fetch;
pub mod merge;

pub use lod::{
    Cell, for_each_cell, is_canonical, player_block_align, resolve_actual, resolve_cell,
    resolve_step,
};
pub use disk_io::{
    FarBlockData, block_from_wire, block_to_wire, compress_block, decompress_block,
    deserialize_block, serialize_block,
};
pub use requests::{PendingRequest, RequestStatus, RequestTable};
pub use store::{FarBlockStore, InsertOutcome};
pub use executor::WorkerPool;
pub use scanner::{FarBlockSink, RAY_FINISHED, RayCacheEntry, RayGrid, RayScanner, ScanContext};
pub use scheduler::{ScanScheduler, ScanState};
pub use tier_db::{FileTierProvider, TierDatabase, TierProvider};
pub use server::FarBlockServer;
pub use fetch::{FarTransport, FetchClient, FetchStats, LocalFarSource, LoopbackTransport, MeshConsumer};
pub use merge::{MergeStats, TierMerger};
