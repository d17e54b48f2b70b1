mod common;

use dungeon_core::{build_headless_app, run_tick, SimulationMetrics, SimulationTick};

#[test]
fn app_initializes() {
    common::ensure_test_config();
    let mut app = build_headless_app();
    // run a single update tick to ensure schedule executes without panic
    app.update();
    common::assert_consistent(&app);
}

#[test]
fn seeded_map_ticks_and_reports_metrics() {
    common::ensure_test_config();
    let mut app = build_headless_app();
    for _ in 0..12 {
        run_tick(&mut app);
    }

    assert_eq!(app.world.resource::<SimulationTick>().0, 12);
    let metrics = app.world.resource::<SimulationMetrics>();
    assert_eq!(metrics.tick, 12);
    assert_eq!(metrics.room_instances, 2);
    assert_eq!(metrics.loose_gold, 0);
    for player in [1u16, 2] {
        let stats = &metrics.players[&player];
        assert_eq!(stats.gold, 3_000);
        assert_eq!(stats.rooms, 1);
        assert!(stats.capacity >= stats.gold);
    }
    common::assert_consistent(&app);
}
