use bevy::prelude::*;

use crate::grid::Point;

/// Tile an entity currently sits on.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePosition(pub Point);

/// Pile of gold lying on the floor, waiting to be picked up or absorbed.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LooseGold {
    pub amount: i32,
}
