use std::collections::BTreeMap;

use bevy::prelude::*;
use serde::Serialize;

use crate::{
    components::LooseGold, economy::PlayerGoldAccount, players::PlayerRegistry,
    resources::SimulationTick, topology::RoomTopology,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerMetrics {
    pub gold: i32,
    pub capacity: i32,
    pub reserve: i32,
    pub rooms: usize,
}

impl PlayerMetrics {
    fn from_account(account: PlayerGoldAccount, rooms: usize) -> Self {
        Self {
            gold: account.current_gold,
            capacity: account.max_gold_capacity,
            reserve: account.reserve,
            rooms,
        }
    }
}

#[derive(Resource, Default, Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    pub tick: u64,
    pub players: BTreeMap<u16, PlayerMetrics>,
    pub room_instances: usize,
    pub loose_gold: i64,
    pub loose_gold_piles: usize,
}

pub fn collect_metrics(
    tick: Res<SimulationTick>,
    registry: Res<PlayerRegistry>,
    topology: Res<RoomTopology>,
    piles: Query<&LooseGold>,
    mut metrics: ResMut<SimulationMetrics>,
) {
    metrics.tick = tick.0;
    metrics.room_instances = topology.instance_count();

    let mut rooms_by_owner: BTreeMap<u16, usize> = BTreeMap::new();
    for instance in topology.instances() {
        *rooms_by_owner.entry(instance.owner.0).or_default() += 1;
    }
    let accounts = topology.ledger().transaction(|ledger| {
        registry
            .players
            .iter()
            .map(|&player| (player, ledger.account(player)))
            .collect::<Vec<_>>()
    });
    metrics.players = accounts
        .into_iter()
        .map(|(player, account)| {
            let rooms = rooms_by_owner.get(&player.0).copied().unwrap_or(0);
            (player.0, PlayerMetrics::from_account(account, rooms))
        })
        .collect();

    metrics.loose_gold = piles.iter().map(|pile| pile.amount as i64).sum();
    metrics.loose_gold_piles = piles.iter().count();
}
