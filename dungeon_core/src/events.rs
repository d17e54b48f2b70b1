use std::collections::BTreeSet;

use bevy::prelude::{Event, World};
use serde::Serialize;

use crate::{
    catalog::RoomId,
    grid::Point,
    players::PlayerId,
    topology::RoomInstanceId,
};

/// Batched notice that a set of tiles changed visually or structurally.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct TilesChanged {
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    Built,
    Captured,
    CapturedByEnemy,
    Sold,
}

/// Lifecycle change of one room instance.
///
/// For `Captured` the owner is the capturer; for `CapturedByEnemy` it is the
/// keeper that lost the room.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct RoomLifecycleEvent {
    pub kind: RoomEventKind,
    pub instance: RoomInstanceId,
    pub room: RoomId,
    pub owner: PlayerId,
    pub tiles: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerActionKind {
    Build,
    Sold,
}

#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct PlayerActionEvent {
    pub kind: PlayerActionKind,
    pub player: PlayerId,
    pub tiles: Vec<Point>,
}

/// Gold to be left lying on a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoldDrop {
    pub at: Point,
    pub amount: i32,
}

/// Gold pulled out of a seam by a dig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedGold {
    pub player: PlayerId,
    pub at: Point,
    pub amount: i32,
}

/// Everything one map operation wants the outside world to hear about.
///
/// Core operations return this instead of calling observers, so notices go
/// out only once the grid, topology and ledger are consistent again.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MapEvents {
    pub changed: BTreeSet<Point>,
    pub rooms: Vec<RoomLifecycleEvent>,
    pub actions: Vec<PlayerActionEvent>,
    pub drops: Vec<GoldDrop>,
    pub mined: Vec<MinedGold>,
}

impl MapEvents {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
            && self.rooms.is_empty()
            && self.actions.is_empty()
            && self.drops.is_empty()
            && self.mined.is_empty()
    }

    pub fn extend(&mut self, other: MapEvents) {
        self.changed.extend(other.changed);
        self.rooms.extend(other.rooms);
        self.actions.extend(other.actions);
        self.drops.extend(other.drops);
        self.mined.extend(other.mined);
    }

    pub fn touch(&mut self, point: Point) {
        self.changed.insert(point);
    }

    pub fn drop_gold(&mut self, at: Point, amount: i32) {
        if amount > 0 {
            self.drops.push(GoldDrop { at, amount });
        }
    }

    /// Send the batched notices into the world's event queues: at most one
    /// `TilesChanged` per call.
    pub fn send(&self, world: &mut World) {
        if !self.changed.is_empty() {
            world.send_event(TilesChanged {
                points: self.changed.iter().copied().collect(),
            });
        }
        for event in &self.rooms {
            world.send_event(event.clone());
        }
        for event in &self.actions {
            world.send_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_merges_changed_points() {
        let mut first = MapEvents::default();
        first.touch(Point::new(1, 1));
        let mut second = MapEvents::default();
        second.touch(Point::new(1, 1));
        second.touch(Point::new(2, 1));
        second.drop_gold(Point::new(2, 1), 0);
        second.drop_gold(Point::new(2, 1), 7);
        first.extend(second);
        assert_eq!(first.changed.len(), 2);
        assert_eq!(first.drops, vec![GoldDrop { at: Point::new(2, 1), amount: 7 }]);
        assert!(!first.is_empty());
    }
}
