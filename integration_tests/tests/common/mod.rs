#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use bevy::app::App;
use bevy::ecs::event::{Event, Events};
use bevy::math::UVec2;
use dungeon_core::{
    apply_command, build_app_with_grid, invariants, load_game_rules_from_env, CatalogHandle,
    CommandOutcome, GameRules, PlacementMode, PlayerId, PlayerStart, Point, RoomTopology,
    SimulationConfig, TerrainId, TileGrid,
};
use dungeon_runtime::{CommandPayload, GridPoint};

static INIT: Once = Once::new();

/// Point the rules loader at the test fixture (shorter loose gold period).
pub fn ensure_test_config() {
    INIT.call_once(|| {
        let rules_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_game_rules.json");

        debug_assert!(
            rules_path.exists(),
            "missing test game rules at {}",
            rules_path.display()
        );

        std::env::set_var("DUNGEON_RULES_PATH", &rules_path);
    });
}

/// Config for an open map: two keepers, no hearts, rooms placeable anywhere.
pub fn sandbox_config(width: u32, height: u32, starting_gold: i32) -> SimulationConfig {
    SimulationConfig {
        grid_size: UVec2::new(width, height),
        starts: vec![
            PlayerStart {
                player: PlayerId(1),
                heart: UVec2::ZERO,
            },
            PlayerStart {
                player: PlayerId(2),
                heart: UVec2::ZERO,
            },
        ],
        starting_gold,
        claimed_radius: 0,
        placement: PlacementMode::Anywhere,
        audit_invariants: true,
    }
}

/// Earth-filled sandbox app using the fixture rules.
pub fn sandbox_app(width: u32, height: u32, starting_gold: i32) -> App {
    ensure_test_config();
    sandbox_app_with_rules(width, height, starting_gold, load_game_rules_from_env())
}

pub fn sandbox_app_with_rules(
    width: u32,
    height: u32,
    starting_gold: i32,
    rules: Arc<GameRules>,
) -> App {
    let catalogs = CatalogHandle::builtin();
    let terrain = catalogs.terrain();
    let earth = terrain
        .by_name("earth")
        .map(|def| def.id)
        .expect("builtin terrain has earth");
    let grid = TileGrid::new(width, height, terrain, earth);
    build_app_with_grid(
        sandbox_config(width, height, starting_gold),
        catalogs,
        rules,
        grid,
    )
}

pub fn terrain(app: &App, name: &str) -> TerrainId {
    app.world
        .resource::<CatalogHandle>()
        .terrain()
        .by_name(name)
        .map(|def| def.id)
        .unwrap_or_else(|| panic!("unknown terrain {name}"))
}

pub fn run(app: &mut App, payload: CommandPayload) -> CommandOutcome {
    let description = format!("{payload:?}");
    apply_command(app, payload).unwrap_or_else(|err| panic!("{description} failed: {err}"))
}

pub fn build(app: &mut App, start: (i32, i32), end: (i32, i32), player: u16, room: &str) -> CommandOutcome {
    run(
        app,
        CommandPayload::Build {
            start: GridPoint::new(start.0, start.1),
            end: GridPoint::new(end.0, end.1),
            player,
            room: room.to_string(),
        },
    )
}

pub fn sell(app: &mut App, start: (i32, i32), end: (i32, i32), player: u16) -> CommandOutcome {
    run(
        app,
        CommandPayload::Sell {
            start: GridPoint::new(start.0, start.1),
            end: GridPoint::new(end.0, end.1),
            player,
        },
    )
}

pub fn topology(app: &App) -> &RoomTopology {
    app.world.resource::<RoomTopology>()
}

pub fn grid(app: &App) -> &TileGrid {
    app.world.resource::<TileGrid>()
}

pub fn tile_owner(app: &App, x: i32, y: i32) -> PlayerId {
    grid(app)
        .tile(Point::new(x, y))
        .map(|tile| tile.owner())
        .expect("tile in bounds")
}

/// Panic with every violation when the map and ledger disagree.
pub fn assert_consistent(app: &App) {
    let violations = invariants::check(grid(app), topology(app));
    assert!(violations.is_empty(), "invariant violations: {violations:#?}");
}

pub fn clear_events<E: Event>(app: &mut App) {
    app.world.resource_mut::<Events<E>>().clear();
}

pub fn drain_events<E: Event + Clone>(app: &App) -> Vec<E> {
    let events = app.world.resource::<Events<E>>();
    let mut reader = events.get_reader();
    reader.read(events).cloned().collect()
}

pub fn app_loose_gold(app: &mut App) -> i32 {
    app.world
        .query::<&dungeon_core::LooseGold>()
        .iter(&app.world)
        .map(|pile| pile.amount)
        .sum()
}
