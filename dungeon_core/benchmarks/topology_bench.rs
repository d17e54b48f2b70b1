use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dungeon_core::{
    grid::Point, CatalogHandle, GoldLedger, PlacementMode, PlayerId, RoomTopology, TileGrid,
};

/// Square grid of claimed floor striped with treasury bands two tiles apart.
fn striped_grid(catalogs: &CatalogHandle, size: u32) -> TileGrid {
    let terrain = catalogs.terrain();
    let treasury = catalogs
        .rooms()
        .by_name("treasury")
        .map(|room| room.terrain)
        .unwrap_or(terrain.claimed_floor);
    let mut grid = TileGrid::new(size, size, Arc::clone(&terrain), terrain.claimed_floor);
    for point in grid.points().collect::<Vec<_>>() {
        let owner = PlayerId(1);
        if point.y % 3 != 2 {
            grid.paint(point, treasury, owner);
        } else {
            grid.paint(point, terrain.claimed_floor, owner);
        }
    }
    grid
}

fn bench_initial_scan(c: &mut Criterion) {
    let catalogs = CatalogHandle::builtin();
    let mut group = c.benchmark_group("initial_scan");

    for size in [16u32, 32, 64, 128] {
        let grid = striped_grid(&catalogs, size);
        group.bench_with_input(BenchmarkId::new("grid", size), &grid, |b, grid| {
            b.iter_batched(
                || RoomTopology::new(catalogs.rooms(), GoldLedger::new()),
                |mut topology| topology.scan_and_build_initial_rooms(grid),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_build_merge(c: &mut Criterion) {
    let catalogs = CatalogHandle::builtin();
    let treasury = catalogs
        .rooms()
        .by_name("treasury")
        .map(|room| room.id)
        .expect("builtin catalog has a treasury");
    let mut group = c.benchmark_group("build_merge");

    for size in [16u32, 32, 64] {
        let grid = striped_grid(&catalogs, size);
        group.bench_with_input(BenchmarkId::new("grid", size), &grid, |b, grid| {
            b.iter_batched(
                || {
                    let ledger = GoldLedger::new();
                    ledger.grant_gold(PlayerId(1), i32::MAX / 2);
                    let mut topology = RoomTopology::new(catalogs.rooms(), ledger);
                    topology.scan_and_build_initial_rooms(grid);
                    (grid.clone(), topology)
                },
                |(mut grid, mut topology)| {
                    // Fill the separating rows so every band merges into one vault.
                    let last = size as i32 - 1;
                    topology.build(
                        &mut grid,
                        Point::new(0, 0),
                        Point::new(last, last),
                        PlayerId(1),
                        treasury,
                        &PlacementMode::ClaimedFloor,
                    )
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(topology_benches, bench_initial_scan, bench_build_merge);
criterion_main!(topology_benches);
