use criterion::{criterion_group, criterion_main, Criterion, black_box};

use std::sync::Arc;

use farmesh::FarConfig;
use farmesh::core::FarParams;
use farmesh::math::Direction;
use farmesh::streaming::lod::{for_each_cell, resolve_step};
use farmesh::streaming::scanner::{FarBlockSink, RayScanner, ScanContext};
use farmesh::streaming::{compress_block, decompress_block};
use farmesh::terrain::{FlatWorld, TerrainGenerator, TerrainParams};

use glam::IVec3;

struct NullSink;

impl FarBlockSink for NullSink {
    fn on_visible(&self, pos: IVec3, _ctx: &ScanContext) {
        black_box(pos);
    }
}

fn bench_resolve_step(c: &mut Criterion) {
    let params = FarParams::default();
    let candidates: Vec<IVec3> = (0..256)
        .map(|i| IVec3::new(i * 97 - 12000, (i % 16) * 8 - 64, 11000 - i * 83))
        .collect();

    c.bench_function("resolve_step_256", |b| {
        b.iter(|| {
            for candidate in &candidates {
                black_box(resolve_step(IVec3::new(1, 5, 1), *candidate, &params));
            }
        });
    });
}

fn bench_for_each_cell(c: &mut Criterion) {
    let params = FarParams::default();

    c.bench_function("for_each_cell_flat", |b| {
        b.iter(|| {
            let mut count = 0usize;
            for_each_cell(black_box(IVec3::new(1, 5, 1)), &params, true, |_| {
                count += 1;
                false
            });
            count
        });
    });
}

fn bench_scan_pass(c: &mut Criterion) {
    let config = Arc::new(FarConfig::default());
    let world = FlatWorld::new(0, -1000);
    let ctx = ScanContext::new(IVec3::new(0, 300, 0), 1, 0, config.clone());

    c.bench_function("scan_pass_bottom_32x32", |b| {
        b.iter(|| {
            let mut scanner = RayScanner::new(Direction::Bottom, config.grid_size, config.initial_distance);
            scanner.scan(&ctx, &world, &NullSink)
        });
    });

    c.bench_function("scan_pass_front_32x32", |b| {
        b.iter(|| {
            let mut scanner = RayScanner::new(Direction::Front, config.grid_size, config.initial_distance);
            scanner.scan(&ctx, &world, &NullSink)
        });
    });
}

fn bench_generate_and_compress(c: &mut Criterion) {
    let generator = TerrainGenerator::new(TerrainParams::default());
    let params = FarParams::default();

    c.bench_function("generate_block_step2", |b| {
        b.iter(|| generator.generate_block(black_box(IVec3::ZERO), 2, 0, &params));
    });

    let block = generator.generate_block(IVec3::ZERO, 2, 0, &params);
    let compressed = compress_block(&block).unwrap();

    c.bench_function("compress_block", |b| {
        b.iter(|| compress_block(black_box(&block)).unwrap());
    });

    c.bench_function("decompress_block", |b| {
        b.iter(|| decompress_block(black_box(&compressed)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_resolve_step,
    bench_for_each_cell,
    bench_scan_pass,
    bench_generate_and_compress,
);
criterion_main!(benches);
