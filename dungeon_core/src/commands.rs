//! Execution of operator commands against the simulation world.

use bevy::prelude::*;
use dungeon_runtime::CommandPayload;
use serde::Serialize;
use thiserror::Error;

use crate::{
    catalog::CatalogHandle,
    components::{LooseGold, TilePosition},
    damage::{TileActionError, TileDamageStateMachine},
    economy::{DepositTarget, PlayerGoldAccount},
    events::{MapEvents, TilesChanged},
    grid::{Point, TileGrid},
    players::{PlayerId, PlayerRegistry},
    resources::{LooseGoldIndex, SimulationConfig, SimulationTick},
    rules::{GameRules, GameRulesHandle},
    topology::{BuildOutcome, RoomInstanceId, RoomTopology, SellOutcome},
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown room type '{0}'")]
    UnknownRoom(String),
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("gold amount must be positive, got {0}")]
    InvalidAmount(i32),
    #[error(transparent)]
    TileAction(#[from] TileActionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerStatus {
    pub player: PlayerId,
    pub account: PlayerGoldAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub instance: RoomInstanceId,
    pub room: String,
    pub owner: PlayerId,
    pub tiles: usize,
    pub stored_gold: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub tick: u64,
    pub players: Vec<PlayerStatus>,
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Ticked { tick: u64 },
    Build { result: BuildOutcome },
    Sell { result: SellOutcome },
    GoldAdded { player: PlayerId, deposited: i32, remainder: i32 },
    GoldSubtracted { player: PlayerId, withdrawn: i32, unsatisfied: i32 },
    TileUpdated { changed: usize },
    Selected { tiles: usize },
    Status { report: StatusReport },
}

/// Run one command. `tick` commands advance the app schedule; everything
/// else is applied directly to the world.
pub fn apply_command(app: &mut App, payload: CommandPayload) -> Result<CommandOutcome, CommandError> {
    match payload {
        CommandPayload::Tick { steps } => {
            for _ in 0..steps.max(1) {
                app.update();
            }
            Ok(CommandOutcome::Ticked {
                tick: app.world.resource::<SimulationTick>().0,
            })
        }
        other => execute_command(&mut app.world, other),
    }
}

pub fn execute_command(world: &mut World, payload: CommandPayload) -> Result<CommandOutcome, CommandError> {
    let verb = payload.verb();
    let economic = payload.touches_economy();
    let result = dispatch(world, payload);
    match &result {
        Ok(outcome) => {
            tracing::debug!(
                target: "dungeon::server",
                command = verb,
                outcome = ?outcome,
                "command.applied"
            );
            if economic {
                log_ledger(world);
            }
        }
        Err(err) => tracing::warn!(
            target: "dungeon::server",
            command = verb,
            error = %err,
            "command.rejected"
        ),
    }
    result
}

fn dispatch(world: &mut World, payload: CommandPayload) -> Result<CommandOutcome, CommandError> {
    match payload {
        CommandPayload::Tick { .. } => Ok(CommandOutcome::Ticked {
            tick: world.resource::<SimulationTick>().0,
        }),
        CommandPayload::Build {
            start,
            end,
            player,
            room,
        } => {
            let player = known_player(world, player)?;
            let room_id = world
                .resource::<CatalogHandle>()
                .rooms()
                .by_name(&room)
                .map(|def| def.id)
                .ok_or(CommandError::UnknownRoom(room))?;
            let placement = world.resource::<SimulationConfig>().placement;
            let (result, events) = with_map(world, |grid, topology, _| {
                topology.build(grid, start.into(), end.into(), player, room_id, &placement)
            });
            publish(world, events);
            Ok(CommandOutcome::Build { result })
        }
        CommandPayload::Sell { start, end, player } => {
            let player = known_player(world, player)?;
            let (result, events) = with_map(world, |grid, topology, rules| {
                topology.sell(grid, start.into(), end.into(), player, rules)
            });
            publish(world, events);
            Ok(CommandOutcome::Sell { result })
        }
        CommandPayload::AddGold { player, amount, at } => {
            let player = known_player(world, player)?;
            if amount <= 0 {
                return Err(CommandError::InvalidAmount(amount));
            }
            let topology = world.resource::<RoomTopology>();
            let target = at.map(Point::from).and_then(|point| {
                topology
                    .instance_id_at(point)
                    .map(|room| DepositTarget { room, at: point })
            });
            let remainder = topology.ledger().add_gold(player, amount, target);
            if remainder > 0 {
                if let Some(point) = at.map(Point::from) {
                    drop_loose_gold(world, point, remainder);
                }
            }
            Ok(CommandOutcome::GoldAdded {
                player,
                deposited: amount - remainder,
                remainder,
            })
        }
        CommandPayload::SubtractGold { player, amount } => {
            let player = known_player(world, player)?;
            if amount <= 0 {
                return Err(CommandError::InvalidAmount(amount));
            }
            let unsatisfied = world
                .resource::<RoomTopology>()
                .ledger()
                .subtract_gold(amount, player);
            Ok(CommandOutcome::GoldSubtracted {
                player,
                withdrawn: amount - unsatisfied,
                unsatisfied,
            })
        }
        CommandPayload::DamageTile {
            at,
            player,
            creature,
        } => {
            let player = known_player(world, player)?;
            let events = with_map(world, |grid, topology, rules| {
                TileDamageStateMachine::new(grid, topology, rules).damage_tile(
                    at.into(),
                    player,
                    creature.as_deref(),
                )
            })?;
            Ok(tile_updated(world, events))
        }
        CommandPayload::HealTile { at, player } => {
            let player = known_player(world, player)?;
            let events = with_map(world, |grid, topology, rules| {
                TileDamageStateMachine::new(grid, topology, rules).heal_tile(at.into(), player)
            })?;
            Ok(tile_updated(world, events))
        }
        CommandPayload::ClaimTile { at, player } => {
            let player = known_player(world, player)?;
            let events = with_map(world, |grid, topology, rules| {
                TileDamageStateMachine::new(grid, topology, rules)
                    .apply_claim_tile(at.into(), player)
            })?;
            Ok(tile_updated(world, events))
        }
        CommandPayload::Select {
            start,
            end,
            player,
            selected,
        } => {
            let player = known_player(world, player)?;
            let changed: Vec<Point> = {
                let mut grid = world.resource_mut::<TileGrid>();
                match grid.clamp_rect(start.into(), end.into()) {
                    Some(rect) => rect
                        .points()
                        .filter(|&point| grid.set_selected(point, player, selected))
                        .collect(),
                    None => Vec::new(),
                }
            };
            let tiles = changed.len();
            if !changed.is_empty() {
                world.send_event(TilesChanged { points: changed });
            }
            Ok(CommandOutcome::Selected { tiles })
        }
        CommandPayload::Status { player } => Ok(CommandOutcome::Status {
            report: status_report(world, player.map(PlayerId)),
        }),
    }
}

fn log_ledger(world: &World) {
    let ledger = world.resource::<RoomTopology>().ledger();
    for &player in &world.resource::<PlayerRegistry>().players {
        let account = ledger.account(player);
        tracing::debug!(
            target: "dungeon::economy",
            %player,
            gold = account.current_gold,
            capacity = account.max_gold_capacity,
            reserve = account.reserve,
            "ledger.after_command"
        );
    }
}

fn known_player(world: &World, player: u16) -> Result<PlayerId, CommandError> {
    let player = PlayerId(player);
    if world.resource::<PlayerRegistry>().contains(player) {
        Ok(player)
    } else {
        Err(CommandError::UnknownPlayer(player))
    }
}

/// Borrow grid, topology and rules together for one map operation.
fn with_map<R>(
    world: &mut World,
    f: impl FnOnce(&mut TileGrid, &mut RoomTopology, &GameRules) -> R,
) -> R {
    let rules = world.resource::<GameRulesHandle>().get();
    world.resource_scope(|world, mut grid: Mut<TileGrid>| {
        let mut topology = world.resource_mut::<RoomTopology>();
        f(&mut grid, &mut topology, &rules)
    })
}

fn tile_updated(world: &mut World, events: MapEvents) -> CommandOutcome {
    let changed = events.changed.len();
    publish(world, events);
    CommandOutcome::TileUpdated { changed }
}

/// Forward an operation's notices and materialise its gold side effects.
pub fn publish(world: &mut World, events: MapEvents) {
    events.send(world);
    for mined in &events.mined {
        let remainder = world
            .resource::<RoomTopology>()
            .ledger()
            .add_gold(mined.player, mined.amount, None);
        drop_loose_gold(world, mined.at, remainder);
    }
    for drop in &events.drops {
        drop_loose_gold(world, drop.at, drop.amount);
    }
}

/// Leave gold on a tile, topping up a pile already lying there.
pub fn drop_loose_gold(world: &mut World, at: Point, amount: i32) {
    if amount <= 0 {
        return;
    }
    let existing = world.resource::<LooseGoldIndex>().at(at).next();
    if let Some(entity) = existing {
        if let Some(mut pile) = world.get_mut::<LooseGold>(entity) {
            pile.amount = pile.amount.saturating_add(amount);
            return;
        }
    }
    let entity = world.spawn((TilePosition(at), LooseGold { amount })).id();
    world.resource_mut::<LooseGoldIndex>().insert(entity, at);
}

pub fn status_report(world: &World, filter: Option<PlayerId>) -> StatusReport {
    let tick = world.resource::<SimulationTick>().0;
    let catalogs = world.resource::<CatalogHandle>();
    let names = catalogs.room_names();
    let topology = world.resource::<RoomTopology>();
    let wanted = |player: PlayerId| filter.map_or(true, |only| only == player);

    let players = world
        .resource::<PlayerRegistry>()
        .players
        .iter()
        .copied()
        .filter(|&player| wanted(player))
        .map(|player| PlayerStatus {
            player,
            account: topology.ledger().account(player),
        })
        .collect();

    let rooms = topology
        .instances()
        .filter(|instance| wanted(instance.owner))
        .map(|instance| RoomSummary {
            instance: instance.id,
            room: names
                .get(&instance.room)
                .cloned()
                .unwrap_or_else(|| instance.room.to_string()),
            owner: instance.owner,
            tiles: instance.len(),
            stored_gold: topology.ledger().room_stock(instance.id),
        })
        .collect();

    StatusReport {
        tick,
        players,
        rooms,
    }
}
