//! Tier merge binary - builds coarser far tiers from finer ones.
//!
//! Usage: cargo run --release --bin far_merge -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   JSON configuration (default: built-in defaults)
//!   --world <DIR>     World directory with far_<step>/ tiers (default: from config)
//!   --from <STEP>     First step to merge upwards (default: 1)
//!   --to <STEP>       Last step to produce (default: step_cap)
//!   --jobs <N>        Parallel merge threads (default: 4)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use farmesh::FarConfig;
use farmesh::core::logging;
use farmesh::streaming::{FileTierProvider, TierMerger};

fn main() {
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
    let from = parse_u8_arg(&args, "--from").unwrap_or(1);
    let to = parse_u8_arg(&args, "--to").unwrap_or(config.params.step_cap);
    let jobs = parse_usize_arg(&args, "--jobs").unwrap_or(4);

    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
        .expect("Failed to configure thread pool");

    println!("=== Farmesh Tier Merge ===");
    println!("World: {}", config.world_dir.display());
    println!("Steps: {} -> {}", from, to);
    println!("Jobs:  {} parallel", jobs);
    println!();

    let provider = Arc::new(FileTierProvider::new(&config.world_dir));
    let merger = TierMerger::new(config.params, provider);

    let start = Instant::now();
    let stats = match merger.merge_range(from, to) {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("Merge failed: {}", e);
            std::process::exit(1);
        }
    };

    for s in &stats {
        println!(
            "  step {:2} -> {:2}: {:6} parents, {:6} saved, {:6} empty",
            s.step,
            s.step + 1,
            s.parents,
            s.saved,
            s.skipped
        );
    }
    println!("Done in {:.1}s", start.elapsed().as_secs_f64());
}

fn parse_u8_arg(args: &[String], flag: &str) -> Option<u8> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
