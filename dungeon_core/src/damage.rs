//! Digging, repairing, claiming and capturing tiles.
//!
//! There is no explicit state enum: what a hit or a heal does follows from
//! the tile's terrain flags, health, owner and gold.

use thiserror::Error;

use crate::{
    catalog::{TerrainFlags, TerrainId},
    events::{MapEvents, MinedGold},
    grid::{Point, TileGrid},
    players::PlayerId,
    rules::GameRules,
    topology::RoomTopology,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileActionError {
    #[error("tile {0} is outside the map")]
    OutOfBounds(Point),
    #[error("tile {point} (terrain {terrain}) cannot be damaged by player {player}")]
    CannotDamage {
        point: Point,
        terrain: TerrainId,
        player: PlayerId,
    },
    #[error("tile {point} (terrain {terrain}) cannot be healed by player {player}")]
    CannotHeal {
        point: Point,
        terrain: TerrainId,
        player: PlayerId,
    },
    #[error("room tile {0} is not indexed to any instance")]
    NoRoomInstance(Point),
}

/// What a single hit is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DamageCategory {
    OwnWall,
    EnemyWall,
    Rock,
    EnemyFloor,
    Gem,
}

impl DamageCategory {
    fn base(self, rules: &GameRules) -> i32 {
        match self {
            DamageCategory::OwnWall => rules.damage.own_wall,
            DamageCategory::EnemyWall => rules.damage.enemy_wall,
            DamageCategory::Rock => rules.damage.rock,
            DamageCategory::EnemyFloor => rules.damage.enemy_floor,
            DamageCategory::Gem => rules.damage.gem,
        }
    }
}

/// Borrowed view over everything a tile action may touch.
pub struct TileDamageStateMachine<'a> {
    grid: &'a mut TileGrid,
    topology: &'a mut RoomTopology,
    rules: &'a GameRules,
}

impl<'a> TileDamageStateMachine<'a> {
    pub fn new(grid: &'a mut TileGrid, topology: &'a mut RoomTopology, rules: &'a GameRules) -> Self {
        Self {
            grid,
            topology,
            rules,
        }
    }

    /// Hit a tile once on behalf of `player`, optionally by a named creature.
    pub fn damage_tile(
        &mut self,
        point: Point,
        player: PlayerId,
        creature: Option<&str>,
    ) -> Result<MapEvents, TileActionError> {
        let category = self.classify_damage(point, player).map_err(log_failure)?;
        let damage = self
            .rules
            .scaled_damage(category.base(self.rules), creature);
        let flags = self.grid.flags_at(point);

        if flags.contains(TerrainFlags::ROOM) {
            return self.damage_room(point, player, damage).map_err(log_failure);
        }

        let mut events = MapEvents::default();
        let gold = self.grid.tile(point).map(|tile| tile.gold()).unwrap_or(0);
        if gold > 0 {
            let mined = if category == DamageCategory::Gem {
                damage
            } else {
                self.grid
                    .tile_mut(point)
                    .map(|tile| tile.mine_gold(damage))
                    .unwrap_or(0)
            };
            if mined > 0 {
                events.mined.push(MinedGold {
                    player,
                    at: point,
                    amount: mined,
                });
            }
            events.touch(point);
            tracing::debug!(
                target: "dungeon::damage",
                x = point.x,
                y = point.y,
                player = player.0,
                mined,
                "tile.mined"
            );
            return Ok(events);
        }

        let health = self.grid.tile(point).map(|tile| tile.health()).unwrap_or(0);
        let remaining = (health - damage).max(0);
        self.grid.set_health(point, remaining);
        events.touch(point);
        if remaining == 0 {
            self.destroy(point);
            tracing::debug!(
                target: "dungeon::damage",
                x = point.x,
                y = point.y,
                player = player.0,
                "tile.destroyed"
            );
        }
        Ok(events)
    }

    fn classify_damage(
        &self,
        point: Point,
        player: PlayerId,
    ) -> Result<DamageCategory, TileActionError> {
        let tile = self
            .grid
            .tile(point)
            .ok_or(TileActionError::OutOfBounds(point))?;
        let flags = self.grid.flags_at(point);
        let owner = tile.owner();
        let refuse = || TileActionError::CannotDamage {
            point,
            terrain: tile.terrain(),
            player,
        };

        if flags.contains(TerrainFlags::IMPENETRABLE) {
            return if flags.contains(TerrainFlags::SOLID) && tile.gold() > 0 {
                Ok(DamageCategory::Gem)
            } else {
                Err(refuse())
            };
        }
        if flags.contains(TerrainFlags::SOLID) {
            return Ok(if owner == player {
                DamageCategory::OwnWall
            } else if owner.is_neutral() {
                DamageCategory::Rock
            } else {
                DamageCategory::EnemyWall
            });
        }
        if flags.contains(TerrainFlags::ROOM) {
            return if owner == player {
                Err(refuse())
            } else {
                Ok(DamageCategory::EnemyFloor)
            };
        }
        if flags.contains(TerrainFlags::OWNABLE) && owner.is_hostile_to(player) {
            return Ok(DamageCategory::EnemyFloor);
        }
        Err(refuse())
    }

    /// Swap a worn-out tile for its destroyed variant. The tile loses its
    /// owner and every selection, and stays at zero health so it can be
    /// claimed back up.
    fn destroy(&mut self, point: Point) {
        let destroyed = self
            .grid
            .terrain_at(point)
            .and_then(|def| def.destroyed_terrain);
        if let Some(destroyed) = destroyed {
            self.grid.set_terrain(point, destroyed);
            self.grid.set_health(point, 0);
        }
        self.grid.set_owner(point, PlayerId::NEUTRAL);
        self.grid.clear_selection(point);
    }

    /// Spread `damage` over every tile of the room at `point`.
    ///
    /// Each tile loses `max(1, round(damage / tiles))`. As soon as any tile
    /// reaches zero the whole instance changes hands.
    pub fn damage_room(
        &mut self,
        point: Point,
        player: PlayerId,
        damage: i32,
    ) -> Result<MapEvents, TileActionError> {
        let instance = self
            .topology
            .instance_at(point)
            .ok_or(TileActionError::NoRoomInstance(point))?;
        let id = instance.id;
        let tiles: Vec<Point> = instance.coordinates.iter().copied().collect();
        let per_tile = ((damage as f32 / tiles.len().max(1) as f32).round() as i32).max(1);

        let mut events = MapEvents::default();
        let mut breached = false;
        for &tile in &tiles {
            let health = self.grid.tile(tile).map(|t| t.health()).unwrap_or(0);
            let remaining = (health - per_tile).max(0);
            self.grid.set_health(tile, remaining);
            events.touch(tile);
            breached |= remaining == 0;
        }
        tracing::debug!(
            target: "dungeon::damage",
            instance = id.0,
            player = player.0,
            per_tile,
            breached,
            "room.damaged"
        );

        if breached {
            events.extend(self.topology.capture_room(self.grid, id, player));
        }
        Ok(events)
    }

    /// Repair, reinforce or claim a tile on behalf of `player`.
    pub fn heal_tile(&mut self, point: Point, player: PlayerId) -> Result<MapEvents, TileActionError> {
        let tile = self
            .grid
            .tile(point)
            .ok_or(TileActionError::OutOfBounds(point))
            .map_err(log_failure)?;
        let flags = self.grid.flags_at(point);
        let owner = tile.owner();
        let terrain = tile.terrain();
        let refuse = TileActionError::CannotHeal {
            point,
            terrain,
            player,
        };

        if !flags.contains(TerrainFlags::OWNABLE) || owner.is_hostile_to(player) {
            return Err(log_failure(refuse));
        }
        let heal = if flags.contains(TerrainFlags::ROOM) {
            if owner != player {
                return Err(log_failure(refuse));
            }
            self.rules.heal.repair_floor
        } else if flags.contains(TerrainFlags::SOLID) {
            if owner == player {
                self.rules.heal.repair_wall
            } else {
                self.rules.heal.reinforce_wall
            }
        } else if owner == player {
            self.rules.heal.repair_floor
        } else {
            self.rules.heal.claim_floor
        };

        let mut events = MapEvents::default();
        let health = tile.health();
        let healed = health.saturating_add(heal);
        self.grid.set_health(point, healed);
        events.touch(point);

        let at_max = self.grid.tile(point).is_some_and(|tile| tile.is_at_max_health());
        if at_max && !flags.contains(TerrainFlags::ROOM) {
            let upgrade = self
                .grid
                .terrain_at(point)
                .and_then(|def| def.max_health_terrain);
            if let Some(upgrade) = upgrade {
                self.grid.set_terrain(point, upgrade);
            }
            if owner != player {
                self.grid.set_owner(point, player);
                self.grid.clear_selection(point);
                for next in point.neighbours8() {
                    if self.grid.in_bounds(next) {
                        events.touch(next);
                    }
                }
                tracing::debug!(
                    target: "dungeon::damage",
                    x = point.x,
                    y = point.y,
                    player = player.0,
                    "tile.claimed"
                );
            }
        }
        Ok(events)
    }

    /// Single entry point for a keeper's claim action: hostile tiles and
    /// rooms not owned by the player are attacked, everything else is healed.
    pub fn apply_claim_tile(&mut self, point: Point, player: PlayerId) -> Result<MapEvents, TileActionError> {
        let tile = self
            .grid
            .tile(point)
            .ok_or(TileActionError::OutOfBounds(point))
            .map_err(log_failure)?;
        let owner = tile.owner();
        let is_room = self.grid.flags_at(point).contains(TerrainFlags::ROOM);
        if owner.is_hostile_to(player) || (is_room && owner != player) {
            self.damage_tile(point, player, None)
        } else {
            self.heal_tile(point, player)
        }
    }
}

fn log_failure(err: TileActionError) -> TileActionError {
    tracing::error!(target: "dungeon::damage", error = %err, "tile.action_rejected");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::CatalogHandle, economy::GoldLedger, invariants, topology::PlacementMode,
    };

    struct Fixture {
        grid: TileGrid,
        topology: RoomTopology,
        rules: GameRules,
    }

    fn fixture() -> Fixture {
        let catalogs = CatalogHandle::builtin();
        let terrain = catalogs.terrain();
        let earth = terrain.by_name("earth").unwrap().id;
        let grid = TileGrid::new(6, 6, terrain, earth);
        let topology = RoomTopology::new(catalogs.rooms(), GoldLedger::new());
        Fixture {
            grid,
            topology,
            rules: GameRules::default(),
        }
    }

    fn terrain(f: &Fixture, name: &str) -> TerrainId {
        f.grid.terrain_catalog().by_name(name).unwrap().id
    }

    #[test]
    fn digging_rock_leaves_an_unowned_path() {
        let mut f = fixture();
        let point = Point::new(2, 2);
        f.grid.set_selected(point, PlayerId(1), true);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        machine.damage_tile(point, PlayerId(1), None).unwrap();
        machine.damage_tile(point, PlayerId(1), None).unwrap();
        machine.damage_tile(point, PlayerId(1), None).unwrap();
        assert_eq!(f.grid.tile(point).unwrap().health(), 25);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        machine.damage_tile(point, PlayerId(1), None).unwrap();
        let tile = f.grid.tile(point).unwrap();
        assert_eq!(tile.terrain(), terrain(&f, "unclaimed_path"));
        assert_eq!(tile.health(), 0);
        assert!(tile.selected_by().is_empty());
    }

    #[test]
    fn gold_is_mined_before_health() {
        let mut f = fixture();
        let seam = terrain(&f, "gold_seam");
        let point = Point::new(1, 1);
        f.grid.paint(point, seam, PlayerId::NEUTRAL);
        f.grid.set_gold(point, 30);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        let events = machine.damage_tile(point, PlayerId(1), Some("imp")).unwrap();
        assert_eq!(events.mined[0].amount, 30);
        let events = machine.damage_tile(point, PlayerId(1), Some("imp")).unwrap();
        assert!(events.mined.is_empty());
        assert_eq!(f.grid.tile(point).unwrap().health(), 50);
    }

    #[test]
    fn gems_never_deplete() {
        let mut f = fixture();
        let gem = terrain(&f, "gem_seam");
        let point = Point::new(0, 0);
        f.grid.paint(point, gem, PlayerId::NEUTRAL);
        let before = f.grid.tile(point).unwrap().gold();
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        let events = machine.damage_tile(point, PlayerId(1), Some("imp")).unwrap();
        assert_eq!(events.mined[0].amount, 40);
        assert_eq!(f.grid.tile(point).unwrap().gold(), before);
    }

    #[test]
    fn impenetrable_rock_rejects_damage() {
        let mut f = fixture();
        let rock = terrain(&f, "impenetrable_rock");
        let point = Point::new(3, 3);
        f.grid.paint(point, rock, PlayerId::NEUTRAL);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        assert!(matches!(
            machine.damage_tile(point, PlayerId(1), None),
            Err(TileActionError::CannotDamage { .. })
        ));
        assert!(matches!(
            machine.damage_tile(Point::new(9, 9), PlayerId(1), None),
            Err(TileActionError::OutOfBounds(_))
        ));
    }

    #[test]
    fn claiming_a_path_converts_it_to_floor() {
        let mut f = fixture();
        let path = terrain(&f, "unclaimed_path");
        let point = Point::new(4, 4);
        f.grid.paint(point, path, PlayerId::NEUTRAL);
        f.grid.set_health(point, 0);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        for _ in 0..3 {
            machine.apply_claim_tile(point, PlayerId(2)).unwrap();
        }
        assert_eq!(f.grid.tile(point).unwrap().owner(), PlayerId::NEUTRAL);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        machine.apply_claim_tile(point, PlayerId(2)).unwrap();
        let tile = f.grid.tile(point).unwrap();
        assert_eq!(tile.terrain(), terrain(&f, "claimed_floor"));
        assert_eq!(tile.owner(), PlayerId(2));
        assert!(tile.is_at_max_health());
    }

    #[test]
    fn claim_on_enemy_floor_damages_it() {
        let mut f = fixture();
        let floor = terrain(&f, "claimed_floor");
        let point = Point::new(2, 3);
        f.grid.paint(point, floor, PlayerId(2));
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        machine.apply_claim_tile(point, PlayerId(1)).unwrap();
        let tile = f.grid.tile(point).unwrap();
        assert_eq!(tile.health(), 45);
        assert_eq!(tile.owner(), PlayerId(2));
    }

    #[test]
    fn reinforcing_earth_upgrades_and_claims() {
        let mut f = fixture();
        let point = Point::new(5, 5);
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        machine.heal_tile(point, PlayerId(1)).unwrap();
        let tile = f.grid.tile(point).unwrap();
        assert_eq!(tile.terrain(), terrain(&f, "reinforced_wall"));
        assert_eq!(tile.owner(), PlayerId(1));
        assert_eq!(tile.health(), 200);
    }

    #[test]
    fn healing_enemy_wall_is_rejected() {
        let mut f = fixture();
        let point = Point::new(1, 4);
        f.grid.set_owner(point, PlayerId(2));
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        assert!(matches!(
            machine.heal_tile(point, PlayerId(1)),
            Err(TileActionError::CannotHeal { .. })
        ));
    }

    #[test]
    fn room_damage_captures_the_whole_instance() {
        let mut f = fixture();
        f.topology.ledger().grant_gold(PlayerId(2), 1_000);
        let lair = f.topology.room_catalog().by_name("lair").unwrap().id;
        f.topology.build(
            &mut f.grid,
            Point::new(0, 0),
            Point::new(1, 0),
            PlayerId(2),
            lair,
            &PlacementMode::Anywhere,
        );
        for x in 0..2 {
            f.grid.set_health(Point::new(x, 0), 20);
        }
        let mut machine = TileDamageStateMachine::new(&mut f.grid, &mut f.topology, &f.rules);
        let events = machine.damage_room(Point::new(0, 0), PlayerId(1), 20).unwrap();
        assert!(events.rooms.is_empty());
        let events = machine.damage_room(Point::new(1, 0), PlayerId(1), 20).unwrap();
        assert_eq!(events.rooms.len(), 2);
        for x in 0..2 {
            let tile = f.grid.tile(Point::new(x, 0)).unwrap();
            assert_eq!(tile.owner(), PlayerId(1));
            assert!(tile.is_at_max_health());
        }
        assert!(invariants::check(&f.grid, &f.topology).is_empty());
    }
}
