//! Far block server binary - serves far blocks of a world directory over TCP.
//!
//! Usage: cargo run --release --bin far_server -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   JSON configuration (default: built-in defaults)
//!   --world <DIR>     World directory with far_<step>/ tiers (default: from config)
//!   --port <PORT>     Listen port (default: 30120)
//!   --no-generate     Only serve stored blocks, never generate missing ones

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use farmesh::FarConfig;
use farmesh::core::logging;
use farmesh::streaming::{FarBlockServer, FileTierProvider};
use farmesh::terrain::TerrainGenerator;
use farmesh_net::{DEFAULT_PORT, FarHandler, FarServer};

#[tokio::main]
async fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => FarConfig::load(&PathBuf::from(&path))
            .unwrap_or_else(|e| panic!("Failed to load config {}: {}", path, e)),
        None => FarConfig::default(),
    };
    if let Some(world) = parse_str_arg(&args, "--world") {
        config.world_dir = PathBuf::from(world);
    }
    let port = parse_u16_arg(&args, "--port").unwrap_or(DEFAULT_PORT);
    let generate = !args.iter().any(|a| a == "--no-generate");

    println!("=== Farmesh Far Block Server ===");
    println!("World:    {}", config.world_dir.display());
    println!("Port:     {}", port);
    println!("Generate: {}", generate);
    println!("Cache:    {} blocks", config.server_cache_blocks);
    println!(
        "Params:   cell_size_pow {}, tree_pow {}, step_cap {}",
        config.params.cell_size_pow, config.params.tree_pow, config.params.step_cap
    );
    println!();

    let generator = generate.then(|| Arc::new(TerrainGenerator::new(config.terrain.clone())));
    let server = Arc::new(
        FarBlockServer::new(
            config.params,
            Arc::new(FileTierProvider::new(&config.world_dir)),
            generator,
        )
        .with_map_generation_limit(config.map_generation_limit)
        .with_cache_capacity(config.server_cache_blocks),
    );

    let handler: Arc<dyn FarHandler> = server.clone();
    let _listener = FarServer::start(handler, ("0.0.0.0", port))
        .await
        .expect("Failed to start far server");

    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        log::info!(
            "{} sessions, {} cached far blocks",
            server.session_count(),
            server.cached_len()
        );
    }
}

fn parse_u16_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
