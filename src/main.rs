//! Farmesh - headless far terrain streaming client
//!
//! Usage: cargo run --release -- <COMMAND> [OPTIONS]
//!
//! Commands:
//!   simulate          Scan around a (moving) viewer and fetch far blocks
//!   cells             Print the octree leaves around a viewer per step
//!   config            Print the default configuration as JSON
//!
//! Options:
//!   --config <PATH>   JSON configuration (default: built-in defaults)
//!   --pos <X,Y,Z>     Viewer position in nodes (default: 0,80,0)
//!   --server <ADDR>   Fetch from a far_server instead of in-process
//!   --local           Generate missing blocks locally, no server at all
//!   --ticks <N>       Simulation ticks (default: 600)
//!   --walk <NODES>    Viewer movement along +X per tick (default: 0)
//!   --all-changed <N> Ask the server to resend everything after N changed
//!                     blocks (default: from config, 0 = never)
//!   --flat            cells: only the viewer's horizontal layer

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use glam::IVec3;

use farmesh::core::logging;
use farmesh::core::time::Uptime;
use farmesh::core::types::{NodePos, node_to_block};
use farmesh::streaming::lod::{for_each_cell, player_block_align};
use farmesh::streaming::{
    FarBlockServer, FarBlockStore, FarTransport, FetchClient, FileTierProvider, LocalFarSource,
    LoopbackTransport, MeshConsumer, RequestTable, ScanScheduler, ScanState, WorkerPool,
};
use farmesh::terrain::TerrainGenerator;
use farmesh::voxel::{FarBlock, MeshHandle};
use farmesh::{FarConfig, Result};
use farmesh_net::FarConnection;

/// Stand-in mesher: counts solid nodes and hands out sequential handles
#[derive(Default)]
struct SolidCountMesher {
    next: AtomicU64,
    solid_nodes: AtomicU64,
}

impl MeshConsumer for SolidCountMesher {
    fn build_mesh(&self, block: Arc<FarBlock>) -> MeshHandle {
        let solid = block
            .to_nodes()
            .iter()
            .filter(|n| !n.is_air() && !n.is_ignore())
            .count();
        self.solid_nodes.fetch_add(solid as u64, Ordering::Relaxed);
        MeshHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

enum Source {
    Remote {
        client: FetchClient,
        transport: Box<dyn FarTransport>,
        // Keeps the connection tasks alive
        _runtime: Option<tokio::runtime::Runtime>,
    },
    Local(LocalFarSource),
}

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("simulate");

    let config = match parse_str_arg(&args, "--config") {
        Some(path) => match FarConfig::load(&PathBuf::from(&path)) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => FarConfig::default(),
    };
    let viewer = parse_pos_arg(&args, "--pos").unwrap_or(IVec3::new(0, 80, 0));

    let result = match command {
        "simulate" => simulate(&args, config, viewer),
        "cells" => {
            print_cells(&config, viewer, args.iter().any(|a| a == "--flat"));
            Ok(())
        }
        "config" => match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{}", json);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        other => {
            eprintln!("Unknown command '{}'. Expected simulate, cells or config.", other);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn simulate(args: &[String], config: FarConfig, start: NodePos) -> Result<()> {
    let ticks = parse_u32_arg(args, "--ticks").unwrap_or(600);
    let walk = parse_i32_arg(args, "--walk").unwrap_or(0);
    let all_changed = parse_u32_arg(args, "--all-changed").unwrap_or(config.all_changed);
    let config = Arc::new(config);

    let requests = Arc::new(RequestTable::new());
    let store = Arc::new(FarBlockStore::new(config.params, requests));
    let pool = Arc::new(WorkerPool::new(config.workers, config.workers * 64)?);
    let generator = Arc::new(TerrainGenerator::new(config.terrain.clone()));
    let mesher = Arc::new(SolidCountMesher::default());
    let mesh_consumer: Arc<dyn MeshConsumer> = mesher.clone();

    let mut source = if args.iter().any(|a| a == "--local") {
        println!("Source: local generation");
        Source::Local(LocalFarSource::new(
            config.clone(),
            generator.clone(),
            store.clone(),
            pool.clone(),
            Some(mesh_consumer.clone()),
        ))
    } else {
        let client = FetchClient::new(config.clone(), store.clone(), pool.clone(), Some(mesh_consumer));
        let (transport, runtime): (Box<dyn FarTransport>, _) = match parse_str_arg(args, "--server") {
            Some(addr) => {
                println!("Source: far server at {}", addr);
                let runtime = tokio::runtime::Runtime::new()?;
                let connection = runtime.block_on(FarConnection::connect(addr.as_str()))?;
                (Box::new(connection), Some(runtime))
            }
            None => {
                println!("Source: in-process server over {}", config.world_dir.display());
                let server = FarBlockServer::new(
                    config.params,
                    Arc::new(FileTierProvider::new(&config.world_dir)),
                    Some(generator.clone()),
                )
                .with_map_generation_limit(config.map_generation_limit)
                .with_cache_capacity(config.server_cache_blocks);
                (Box::new(LoopbackTransport::new(Arc::new(server))), None)
            }
        };
        client.init(transport.as_ref())?;
        Source::Remote {
            client,
            transport,
            _runtime: runtime,
        }
    };

    let mut scheduler = ScanScheduler::new(config.clone(), generator, store.clone(), pool.clone());
    let uptime = Uptime::new();
    let mut viewer = start;
    let mut last_viewer_block = None;

    for tick in 0..ticks {
        let now = uptime.secs();
        let state = scheduler.tick(viewer, now);

        match &mut source {
            Source::Remote {
                client, transport, ..
            } => {
                let viewer_block = player_block_align(node_to_block(viewer), &config.params);
                if last_viewer_block != Some(viewer_block) {
                    client.draw_control(transport.as_ref(), viewer_block, all_changed)?;
                    last_viewer_block = Some(viewer_block);
                }
                client.flush(transport.as_ref())?;
                client.poll(transport.as_mut(), now);
                if client.take_invalidate() {
                    scheduler.request_invalidate();
                }
            }
            Source::Local(local) => {
                local.pump(now);
            }
        }

        let settled = state == ScanState::Complete
            && store.requests().unsent_len() == 0
            && pool.queued() == 0;
        if walk == 0 && settled {
            println!("Scan settled after {} ticks", tick + 1);
            break;
        }
        viewer.x += walk;
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.wait_idle(Duration::from_secs(30));

    println!();
    println!("=== Far blocks ===");
    for step in 0..=config.params.step_cap {
        let count = store.len_at(step);
        if count > 0 {
            println!("  step {:2}: {}", step, count);
        }
    }
    println!("Stored:   {}", store.len());
    println!("Active:   {}", store.active_len());
    println!("Pending:  {}", store.requests().len());
    println!("Meshes:   {} ({} solid nodes)", mesher.next.load(Ordering::Relaxed), mesher.solid_nodes.load(Ordering::Relaxed));
    println!("Passes:   {}", scheduler.iteration());
    if let Source::Remote { client, .. } = &source {
        let stats = client.stats();
        println!(
            "Fetch:    {} sent, {} received, {} stale, {} unavailable, {} dropped",
            stats.sent, stats.received, stats.stale, stats.unavailable, stats.dropped
        );
    }
    Ok(())
}

fn print_cells(config: &FarConfig, viewer: NodePos, flat: bool) {
    let params = &config.params;
    let viewer_block = player_block_align(node_to_block(viewer), params);
    let mut per_step: BTreeMap<u8, usize> = BTreeMap::new();
    for_each_cell(viewer_block, params, flat, |cell| {
        *per_step.entry(cell.step(params)).or_default() += 1;
        false
    });

    println!("=== Octree leaves around block {:?} ===", viewer_block);
    println!(
        "cell_size_pow {}, quality {}, tree_pow {}, step_cap {}{}",
        params.cell_size_pow,
        params.quality,
        params.tree_pow,
        params.step_cap,
        if flat { " (flat)" } else { "" }
    );
    let mut total = 0;
    for (step, count) in &per_step {
        println!("  step {:2}: {:6} cells of {} blocks", step, count, params.base_cell() << step);
        total += count;
    }
    println!("Total: {}", total);
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_i32_arg(args: &[String], flag: &str) -> Option<i32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_pos_arg(args: &[String], flag: &str) -> Option<IVec3> {
    let value = parse_str_arg(args, flag)?;
    let parts: Vec<i32> = value
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts[..] {
        [x, y, z] => Some(IVec3::new(x, y, z)),
        _ => None,
    }
}
