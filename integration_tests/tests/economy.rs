mod common;

use std::thread;

use common::{assert_consistent, build, run, topology};
use dungeon_core::{run_tick, CommandOutcome, LooseGold, PlayerId, Point, SimulationMetrics};
use dungeon_runtime::{CommandPayload, GridPoint};

fn loose_piles(app: &mut bevy::app::App) -> Vec<i32> {
    app.world
        .query::<&LooseGold>()
        .iter(&app.world)
        .map(|pile| pile.amount)
        .collect()
}

#[test]
fn ledger_stays_exact_under_concurrent_commands() {
    let mut app = common::sandbox_app(8, 8, 2_000);
    build(&mut app, (1, 1), (3, 3), 1, "treasury");
    build(&mut app, (5, 5), (6, 6), 1, "treasury");
    let ledger = topology(&app).ledger().clone();
    let start = ledger.account(PlayerId(1));
    assert_eq!(start.current_gold, 2_000 - 1_300);

    thread::scope(|scope| {
        for worker in 0..8 {
            let ledger = ledger.clone();
            scope.spawn(move || {
                for round in 0..250 {
                    let amount = 1 + (worker * 7 + round) % 40;
                    let remainder = ledger.add_gold(PlayerId(1), amount, None);
                    let unsatisfied = ledger.subtract_gold(amount - remainder, PlayerId(1));
                    assert_eq!(unsatisfied, 0);
                }
            });
        }
    });

    let end = ledger.account(PlayerId(1));
    assert_eq!(end.current_gold, start.current_gold);
    assert_eq!(end.max_gold_capacity, start.max_gold_capacity);
    assert_eq!(
        ledger.transaction(|state| state.expected_gold(PlayerId(1))),
        end.current_gold
    );
    assert_consistent(&app);
}

#[test]
fn overflow_lies_on_the_floor_until_the_vault_has_room() {
    let mut app = common::sandbox_app(5, 5, 100);
    build(&mut app, (1, 1), (1, 1), 1, "treasury");

    let outcome = run(
        &mut app,
        CommandPayload::AddGold {
            player: 1,
            amount: 800,
            at: Some(GridPoint::new(1, 1)),
        },
    );
    assert_eq!(
        outcome,
        CommandOutcome::GoldAdded {
            player: PlayerId(1),
            deposited: 500,
            remainder: 300,
        }
    );
    assert_eq!(loose_piles(&mut app), vec![300]);

    run(
        &mut app,
        CommandPayload::SubtractGold {
            player: 1,
            amount: 400,
        },
    );
    let vault = topology(&app)
        .instance_id_at(Point::new(1, 1))
        .expect("vault");
    assert_eq!(topology(&app).ledger().room_stock(vault), Some(100));

    // The fixture rules sweep loose gold every five ticks.
    for _ in 0..4 {
        run_tick(&mut app);
    }
    assert_eq!(loose_piles(&mut app), vec![300]);
    assert_eq!(app.world.resource::<SimulationMetrics>().loose_gold, 300);

    run_tick(&mut app);
    assert!(loose_piles(&mut app).is_empty());
    assert_eq!(topology(&app).ledger().room_stock(vault), Some(400));
    assert_eq!(topology(&app).ledger().account(PlayerId(1)).current_gold, 400);

    run_tick(&mut app);
    let metrics = app.world.resource::<SimulationMetrics>();
    assert_eq!(metrics.loose_gold, 0);
    assert_eq!(metrics.loose_gold_piles, 0);
    assert_consistent(&app);
}

#[test]
fn gold_dropped_off_vault_stays_put_and_piles_up() {
    let mut app = common::sandbox_app(5, 5, 100);
    build(&mut app, (1, 1), (1, 1), 1, "treasury");
    for _ in 0..2 {
        run(
            &mut app,
            CommandPayload::AddGold {
                player: 1,
                amount: 400,
                at: Some(GridPoint::new(3, 3)),
            },
        );
    }
    // 500 fits in the vault; the other 300 tops up one pile on (3, 3).
    assert_eq!(loose_piles(&mut app), vec![300]);

    run(
        &mut app,
        CommandPayload::SubtractGold {
            player: 1,
            amount: 500,
        },
    );
    for _ in 0..10 {
        run_tick(&mut app);
    }
    assert_eq!(loose_piles(&mut app), vec![300]);
    assert_eq!(topology(&app).ledger().account(PlayerId(1)).current_gold, 0);
    assert_consistent(&app);
}

#[test]
fn mining_credits_the_digger() {
    let mut app = common::sandbox_app(4, 4, 100);
    build(&mut app, (0, 0), (0, 0), 1, "treasury");
    let seam = common::terrain(&app, "gold_seam");
    {
        let mut grid = app.world.resource_mut::<dungeon_core::TileGrid>();
        grid.paint(Point::new(2, 2), seam, PlayerId::NEUTRAL);
        grid.set_gold(Point::new(2, 2), 70);
    }

    let dig = CommandPayload::DamageTile {
        at: GridPoint::new(2, 2),
        player: 1,
        creature: Some("imp".to_string()),
    };
    run(&mut app, dig.clone());
    run(&mut app, dig);

    assert_eq!(topology(&app).ledger().account(PlayerId(1)).current_gold, 70);
    let tile = common::grid(&app).tile(Point::new(2, 2)).expect("tile");
    assert_eq!(tile.gold(), 0);
    assert_eq!(tile.health(), tile.max_health());
    assert_consistent(&app);
}

#[test]
fn extreme_gold_commands_settle_without_overflow() {
    let mut app = common::sandbox_app(6, 6, 1_000);
    build(&mut app, (1, 1), (1, 1), 1, "treasury");
    build(&mut app, (4, 4), (4, 4), 1, "treasury");

    let outcome = run(
        &mut app,
        CommandPayload::AddGold {
            player: 1,
            amount: i32::MAX,
            at: None,
        },
    );
    assert_eq!(
        outcome,
        CommandOutcome::GoldAdded {
            player: PlayerId(1),
            deposited: 1_000,
            remainder: i32::MAX - 1_000,
        }
    );
    assert_eq!(topology(&app).ledger().account(PlayerId(1)).current_gold, 1_800);

    let outcome = run(
        &mut app,
        CommandPayload::SubtractGold {
            player: 1,
            amount: i32::MAX,
        },
    );
    assert_eq!(
        outcome,
        CommandOutcome::GoldSubtracted {
            player: PlayerId(1),
            withdrawn: 1_800,
            unsatisfied: i32::MAX - 1_800,
        }
    );
    assert_eq!(topology(&app).ledger().account(PlayerId(1)).current_gold, 0);

    // Two oversized drops on the same tile cap the pile instead of wrapping.
    for _ in 0..2 {
        run(
            &mut app,
            CommandPayload::AddGold {
                player: 1,
                amount: i32::MAX,
                at: Some(GridPoint::new(2, 2)),
            },
        );
    }
    assert_eq!(loose_piles(&mut app), vec![i32::MAX]);
    assert_eq!(topology(&app).ledger().account(PlayerId(1)).current_gold, 1_000);

    run_tick(&mut app);
    assert_eq!(
        app.world.resource::<SimulationMetrics>().loose_gold,
        i64::from(i32::MAX)
    );
    assert_consistent(&app);
}
