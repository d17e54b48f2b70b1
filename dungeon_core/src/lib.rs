//! Core simulation crate for the headless dungeon prototype.
//!
//! Owns the tile grid, room topology, gold ledger and tile damage rules, and
//! wires them into a Bevy [`App`] whose chained systems advance one fixed
//! tick per [`run_tick`]. Player actions arrive as
//! [`dungeon_runtime::CommandPayload`]s and are applied between ticks by
//! [`commands::apply_command`].

pub mod catalog;
pub mod commands;
mod components;
pub mod damage;
pub mod economy;
pub mod events;
pub mod grid;
pub mod invariants;
pub mod metrics;
pub mod players;
mod resources;
pub mod room_controls;
pub mod rules;
mod systems;
pub mod topology;

use std::sync::Arc;

use bevy::prelude::*;

pub use catalog::{
    load_catalogs, load_catalogs_from_env, CatalogHandle, RoomCatalog, RoomId, TerrainCatalog,
    TerrainId,
};
pub use commands::{apply_command, execute_command, CommandError, CommandOutcome};
pub use components::{LooseGold, TilePosition};
pub use damage::{TileActionError, TileDamageStateMachine};
pub use economy::{GoldLedger, PlayerGoldAccount};
pub use events::{
    MapEvents, PlayerActionEvent, PlayerActionKind, RoomEventKind, RoomLifecycleEvent,
    TilesChanged,
};
pub use grid::{Point, Tile, TileGrid};
pub use metrics::SimulationMetrics;
pub use players::{PlayerId, PlayerRegistry};
pub use resources::{LooseGoldIndex, PlayerStart, SimulationConfig, SimulationTick};
pub use rules::{load_game_rules_from_env, GameRules, GameRulesHandle};
pub use topology::{BuildOutcome, PlacementMode, RoomTopology, SellOutcome};

/// Construct a Bevy [`App`] on a freshly seeded map, with catalogs and rules
/// loaded from the environment.
pub fn build_headless_app() -> App {
    let config = SimulationConfig::default();
    let catalogs = load_catalogs_from_env().unwrap_or_else(|err| {
        tracing::error!(
            target: "dungeon::config",
            error = %err,
            "catalogs.load_failed; using builtin catalogs"
        );
        CatalogHandle::builtin()
    });
    let rules = load_game_rules_from_env();
    let grid = seed_dungeon(&config, &catalogs);
    build_app_with_grid(config, catalogs, rules, grid)
}

/// Construct the app around an already painted grid.
///
/// Rooms present on the grid are indexed immediately and every configured
/// keeper receives the starting gold, deposited into its vaults first and
/// held in reserve beyond that.
pub fn build_app_with_grid(
    config: SimulationConfig,
    catalogs: CatalogHandle,
    rules: Arc<GameRules>,
    grid: TileGrid,
) -> App {
    let ledger = GoldLedger::new();
    let mut topology = RoomTopology::new(catalogs.rooms(), ledger.clone());
    let initial = topology.scan_and_build_initial_rooms(&grid);
    for player in config.players() {
        let remainder = ledger.add_gold(player, config.starting_gold, None);
        ledger.grant_gold(player, remainder);
    }
    let registry = PlayerRegistry::new(config.players());

    let mut app = App::new();
    app.insert_resource(config)
        .insert_resource(catalogs)
        .insert_resource(GameRulesHandle::new(rules))
        .insert_resource(registry)
        .insert_resource(grid)
        .insert_resource(topology)
        .insert_resource(ledger)
        .insert_resource(SimulationTick::default())
        .insert_resource(resources::LooseGoldTimer::default())
        .insert_resource(LooseGoldIndex::default())
        .insert_resource(SimulationMetrics::default())
        .add_plugins(MinimalPlugins)
        .add_event::<TilesChanged>()
        .add_event::<RoomLifecycleEvent>()
        .add_event::<PlayerActionEvent>()
        .add_systems(
            Update,
            (
                systems::advance_tick,
                systems::index_loose_gold,
                systems::absorb_loose_gold,
                systems::audit_invariants,
                metrics::collect_metrics,
            )
                .chain(),
        );

    commands::publish(&mut app.world, initial);
    app
}

/// Execute a single simulation tick.
///
/// Each call runs the chained systems configured in [`build_app_with_grid`]
/// (tick increment → loose gold index → absorption → invariant audit →
/// metrics).
pub fn run_tick(app: &mut App) {
    app.update();
}

/// Paint the default level: earth bounded by impenetrable rock, a claimed
/// floor square and a dungeon heart per keeper, a gold seam band and a water
/// channel down the middle.
pub fn seed_dungeon(config: &SimulationConfig, catalogs: &CatalogHandle) -> TileGrid {
    let terrain = catalogs.terrain();
    let rooms = catalogs.rooms();
    let named = |name: &str, fallback: TerrainId| {
        terrain.by_name(name).map(|def| def.id).unwrap_or(fallback)
    };
    let earth = named("earth", terrain.unclaimed_floor);
    let border = named("impenetrable_rock", earth);
    let seam = named("gold_seam", earth);
    let claimed = terrain.claimed_floor;
    let water = terrain.water;
    let heart = rooms.by_name("dungeon_heart").map(|def| def.terrain);

    let width = config.grid_size.x;
    let height = config.grid_size.y;
    let mut grid = TileGrid::new(width, height, Arc::clone(&terrain), earth);
    let (w, h) = (width as i32, height as i32);

    for point in grid.points().collect::<Vec<_>>() {
        if point.x == 0 || point.y == 0 || point.x == w - 1 || point.y == h - 1 {
            grid.paint(point, border, PlayerId::NEUTRAL);
        }
    }

    let mid = w / 2;
    for y in 1..h - 1 {
        grid.paint(Point::new(mid, y), water, PlayerId::NEUTRAL);
        if y % 4 == 0 {
            grid.paint(Point::new(mid - 3, y), seam, PlayerId::NEUTRAL);
            grid.paint(Point::new(mid + 3, y), seam, PlayerId::NEUTRAL);
        }
    }

    for start in &config.starts {
        let centre = Point::new(start.heart.x as i32, start.heart.y as i32);
        let radius = config.claimed_radius as i32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let point = Point::new(centre.x + dx, centre.y + dy);
                let interior = point.x > 0 && point.y > 0 && point.x < w - 1 && point.y < h - 1;
                if !interior {
                    continue;
                }
                let paint = match heart {
                    Some(heart) if dx.abs() <= 2 && dy.abs() <= 2 => heart,
                    _ => claimed,
                };
                grid.paint(point, paint, start.player);
            }
        }
    }

    grid
}
