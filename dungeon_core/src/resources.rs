use std::collections::{BTreeSet, HashMap};

use bevy::{math::UVec2, prelude::*};

use crate::{grid::Point, players::PlayerId, topology::PlacementMode};

/// Where a keeper's dungeon heart sits on a freshly seeded map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStart {
    pub player: PlayerId,
    pub heart: UVec2,
}

/// Global configuration parameters for the headless simulation.
#[derive(Resource, Debug, Clone)]
pub struct SimulationConfig {
    pub grid_size: UVec2,
    pub starts: Vec<PlayerStart>,
    pub starting_gold: i32,
    /// Radius of claimed floor painted around each heart.
    pub claimed_radius: u32,
    pub placement: PlacementMode,
    /// Run the invariant audit every tick and log violations.
    pub audit_invariants: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            grid_size: UVec2::new(48, 32),
            starts: vec![
                PlayerStart {
                    player: PlayerId(1),
                    heart: UVec2::new(8, 16),
                },
                PlayerStart {
                    player: PlayerId(2),
                    heart: UVec2::new(39, 16),
                },
            ],
            starting_gold: 3_000,
            claimed_radius: 4,
            placement: PlacementMode::ClaimedFloor,
            audit_invariants: cfg!(debug_assertions),
        }
    }
}

impl SimulationConfig {
    pub fn players(&self) -> Vec<PlayerId> {
        self.starts.iter().map(|start| start.player).collect()
    }
}

/// Tracks total simulation ticks elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// Counts ticks towards the next loose gold sweep.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LooseGoldTimer {
    elapsed_ticks: u32,
}

impl LooseGoldTimer {
    /// Advance one tick; true when a sweep is due. The timer re-arms itself.
    pub fn advance(&mut self, period_ticks: u32) -> bool {
        self.elapsed_ticks += 1;
        if self.elapsed_ticks >= period_ticks.max(1) {
            self.elapsed_ticks = 0;
            true
        } else {
            false
        }
    }
}

/// Loose gold piles by tile, kept in step with the ECS change sets.
#[derive(Resource, Default, Debug, Clone)]
pub struct LooseGoldIndex {
    by_tile: HashMap<Point, BTreeSet<Entity>>,
    positions: HashMap<Entity, Point>,
}

impl LooseGoldIndex {
    pub fn insert(&mut self, entity: Entity, point: Point) {
        if let Some(previous) = self.positions.insert(entity, point) {
            if previous != point {
                self.detach(entity, previous);
            }
        }
        self.by_tile.entry(point).or_default().insert(entity);
    }

    pub fn remove(&mut self, entity: Entity) {
        if let Some(point) = self.positions.remove(&entity) {
            self.detach(entity, point);
        }
    }

    fn detach(&mut self, entity: Entity, point: Point) {
        if let Some(entities) = self.by_tile.get_mut(&point) {
            entities.remove(&entity);
            if entities.is_empty() {
                self.by_tile.remove(&point);
            }
        }
    }

    pub fn at(&self, point: Point) -> impl Iterator<Item = Entity> + '_ {
        self.by_tile
            .get(&point)
            .into_iter()
            .flat_map(|entities| entities.iter().copied())
    }

    /// Occupied tiles in row-major order.
    pub fn tiles(&self) -> Vec<Point> {
        let mut tiles: Vec<Point> = self.by_tile.keys().copied().collect();
        tiles.sort();
        tiles
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
