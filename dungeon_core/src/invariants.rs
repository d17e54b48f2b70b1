//! Consistency checks over grid, topology and ledger.
//!
//! Nothing here repairs state: a violation is a bug in the mutating code.
//! Tests call [`check`] after every mutation, and the tick pipeline runs it
//! in debug builds and logs what it finds.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use thiserror::Error;

use crate::{
    grid::{Point, TileGrid},
    players::PlayerId,
    topology::{RoomInstanceId, RoomTopology},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("tile {0} health outside 0..=max")]
    HealthOutOfRange(Point),
    #[error("room tile {0} belongs to no instance")]
    UnindexedRoomTile(Point),
    #[error("tile {point} claimed by {count} instances")]
    SharedTile { point: Point, count: usize },
    #[error("tile {point} indexed to {indexed} but listed by {listed:?}")]
    IndexMismatch {
        point: Point,
        indexed: RoomInstanceId,
        listed: Vec<RoomInstanceId>,
    },
    #[error("instance {0} mixes room types or owners")]
    Heterogeneous(RoomInstanceId),
    #[error("instance {0} is not 4-connected")]
    Disconnected(RoomInstanceId),
    #[error("instances {0} and {1} touch but were not merged")]
    NotMaximal(RoomInstanceId, RoomInstanceId),
    #[error("instance {0} has no ledger storage")]
    MissingStorage(RoomInstanceId),
    #[error("player {player} capacity {recorded} != vault sum {expected}")]
    CapacityDrift {
        player: PlayerId,
        recorded: i32,
        expected: i32,
    },
    #[error("player {player} gold {recorded} != stored plus reserve {expected}")]
    GoldDrift {
        player: PlayerId,
        recorded: i32,
        expected: i32,
    },
}

/// Collect every violation currently present.
pub fn check(grid: &TileGrid, topology: &RoomTopology) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let mut listed: BTreeMap<Point, Vec<RoomInstanceId>> = BTreeMap::new();
    for instance in topology.instances() {
        for &point in &instance.coordinates {
            listed.entry(point).or_default().push(instance.id);
        }
    }

    for tile in grid.tiles() {
        let point = tile.point();
        if tile.health() < 0 || tile.health() > tile.max_health() {
            violations.push(InvariantViolation::HealthOutOfRange(point));
        }
        let is_room = topology.room_at(grid, point).is_some();
        match (is_room, topology.instance_id_at(point)) {
            (true, None) => violations.push(InvariantViolation::UnindexedRoomTile(point)),
            (_, Some(indexed)) => {
                let owners = listed.get(&point).cloned().unwrap_or_default();
                if owners != [indexed] {
                    violations.push(InvariantViolation::IndexMismatch {
                        point,
                        indexed,
                        listed: owners,
                    });
                }
            }
            (false, None) => {}
        }
    }

    for (point, owners) in &listed {
        if owners.len() > 1 {
            violations.push(InvariantViolation::SharedTile {
                point: *point,
                count: owners.len(),
            });
        }
    }

    for instance in topology.instances() {
        let homogeneous = instance.coordinates.iter().all(|&point| {
            topology
                .room_at(grid, point)
                .is_some_and(|room| room.id == instance.room)
                && grid
                    .tile(point)
                    .is_some_and(|tile| tile.owner() == instance.owner)
        });
        if !homogeneous {
            violations.push(InvariantViolation::Heterogeneous(instance.id));
        }
        if !is_connected(&instance.coordinates) {
            violations.push(InvariantViolation::Disconnected(instance.id));
        }
        for &point in &instance.coordinates {
            for next in point.neighbours4() {
                let Some(other) = topology.instance_at(next) else {
                    continue;
                };
                if other.id > instance.id
                    && other.room == instance.room
                    && other.owner == instance.owner
                {
                    let violation = InvariantViolation::NotMaximal(instance.id, other.id);
                    if !violations.contains(&violation) {
                        violations.push(violation);
                    }
                }
            }
        }
    }

    topology.ledger().transaction(|ledger| {
        let known: BTreeSet<RoomInstanceId> = ledger.rooms().collect();
        for instance in topology.instances() {
            if !known.contains(&instance.id) {
                violations.push(InvariantViolation::MissingStorage(instance.id));
            }
        }
        let accounts: Vec<(PlayerId, i32, i32)> = ledger
            .accounts()
            .map(|(player, account)| (player, account.max_gold_capacity, account.current_gold))
            .collect();
        for (player, capacity, gold) in accounts {
            let expected = ledger.expected_capacity(player);
            if capacity != expected {
                violations.push(InvariantViolation::CapacityDrift {
                    player,
                    recorded: capacity,
                    expected,
                });
            }
            let expected = ledger.expected_gold(player);
            if gold != expected {
                violations.push(InvariantViolation::GoldDrift {
                    player,
                    recorded: gold,
                    expected,
                });
            }
        }
    });

    violations
}

fn is_connected(tiles: &BTreeSet<Point>) -> bool {
    let Some(&seed) = tiles.iter().next() else {
        return true;
    };
    let mut seen = BTreeSet::from([seed]);
    let mut queue = VecDeque::from([seed]);
    while let Some(point) = queue.pop_front() {
        for next in point.neighbours4() {
            if tiles.contains(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.len() == tiles.len()
}
