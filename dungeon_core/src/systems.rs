use bevy::prelude::*;
use log::debug;

use crate::{
    components::{LooseGold, TilePosition},
    economy::DepositTarget,
    grid::TileGrid,
    invariants,
    resources::{LooseGoldIndex, LooseGoldTimer, SimulationConfig, SimulationTick},
    rules::GameRulesHandle,
    topology::RoomTopology,
};

pub fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Fold this tick's spawned, moved and removed piles into the index.
pub fn index_loose_gold(
    moved: Query<(Entity, &TilePosition), (With<LooseGold>, Changed<TilePosition>)>,
    mut removed: RemovedComponents<LooseGold>,
    mut index: ResMut<LooseGoldIndex>,
) {
    for entity in removed.read() {
        index.remove(entity);
    }
    for (entity, position) in moved.iter() {
        index.insert(entity, position.0);
    }
}

/// Every absorb period, piles lying on a keeper's vault tiles are deposited
/// into that vault. Whatever does not fit stays on the floor.
pub fn absorb_loose_gold(
    mut commands: Commands,
    rules: Res<GameRulesHandle>,
    mut timer: ResMut<LooseGoldTimer>,
    topology: Res<RoomTopology>,
    mut index: ResMut<LooseGoldIndex>,
    mut piles: Query<&mut LooseGold>,
) {
    if !timer.advance(rules.rules().absorb_period_ticks()) {
        return;
    }

    let ledger = topology.ledger();
    let mut absorbed_total: i64 = 0;
    for point in index.tiles() {
        let Some(instance) = topology.instance_at(point) else {
            continue;
        };
        if instance.owner.is_neutral() || ledger.room_stock(instance.id).is_none() {
            continue;
        }
        let target = DepositTarget {
            room: instance.id,
            at: point,
        };
        let entities: Vec<Entity> = index.at(point).collect();
        for entity in entities {
            let Ok(mut pile) = piles.get_mut(entity) else {
                index.remove(entity);
                continue;
            };
            let remainder = ledger.add_gold(instance.owner, pile.amount, Some(target));
            absorbed_total += i64::from(pile.amount - remainder);
            if remainder == 0 {
                pile.amount = 0;
                index.remove(entity);
                commands.entity(entity).despawn();
            } else if remainder != pile.amount {
                pile.amount = remainder;
            }
        }
    }

    if absorbed_total > 0 {
        tracing::debug!(
            target: "dungeon::economy",
            absorbed = absorbed_total,
            "loose_gold.absorbed"
        );
    }
}

/// Log every invariant violation. Enabled through the simulation config.
pub fn audit_invariants(
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
    grid: Res<TileGrid>,
    topology: Res<RoomTopology>,
) {
    if !config.audit_invariants {
        return;
    }
    let violations = invariants::check(&grid, &topology);
    for violation in &violations {
        tracing::error!(
            target: "dungeon::topology",
            tick = tick.0,
            violation = %violation,
            "invariant.violated"
        );
    }
    if violations.is_empty() {
        debug!("tick {} passed invariant audit", tick.0);
    }
}
