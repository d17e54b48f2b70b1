//! Room detection, merging and splitting.
//!
//! A room instance is a maximal 4-connected set of tiles painted with the
//! same room terrain and owned by the same keeper. Every room tile maps to
//! exactly one instance through `tile_index`. Instances grow by merging on
//! build and capture; selling destroys every touched instance and re-forms
//! the survivors from scratch.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use bevy::prelude::Resource;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{PlacementFlags, RoomCatalog, RoomDefinition, RoomId, TerrainFlags},
    economy::GoldLedger,
    events::{
        GoldDrop, MapEvents, PlayerActionEvent, PlayerActionKind, RoomEventKind,
        RoomLifecycleEvent,
    },
    grid::{Point, TileGrid, TileRect},
    players::PlayerId,
    rules::GameRules,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomInstanceId(pub u32);

impl fmt::Display for RoomInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInstance {
    pub id: RoomInstanceId,
    pub room: RoomId,
    pub owner: PlayerId,
    pub coordinates: BTreeSet<Point>,
    pub destroyed: bool,
}

impl RoomInstance {
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    fn lifecycle(&self, kind: RoomEventKind, owner: PlayerId) -> RoomLifecycleEvent {
        RoomLifecycleEvent {
            kind,
            instance: self.id,
            room: self.room,
            owner,
            tiles: self.coordinates.iter().copied().collect(),
        }
    }
}

/// Decides which tiles a keeper may paint rooms onto.
pub trait PlacementRules {
    /// Land tile that can take a land room.
    fn can_build_on(&self, grid: &TileGrid, point: Point, player: PlayerId) -> bool;

    /// Liquid tile a water or lava room may start spreading from.
    fn can_anchor_on(&self, grid: &TileGrid, point: Point, player: PlayerId) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Rooms go on the player's claimed floor; bridges start next to it.
    #[default]
    ClaimedFloor,
    /// Any non-room land tile; used for sandbox maps and tests.
    ///
    /// The tile's previous land terrain is not kept: selling reverts it to the
    /// room's destroyed terrain (claimed floor) owned by the seller, so a
    /// build then sell on earth leaves claimed floor behind.
    Anywhere,
}

impl PlacementRules for PlacementMode {
    fn can_build_on(&self, grid: &TileGrid, point: Point, player: PlayerId) -> bool {
        let Some(tile) = grid.tile(point) else {
            return false;
        };
        let flags = grid.flags_at(point);
        if flags.intersects(
            TerrainFlags::ROOM | TerrainFlags::IMPENETRABLE | TerrainFlags::WATER | TerrainFlags::LAVA,
        ) {
            return false;
        }
        match self {
            PlacementMode::ClaimedFloor => {
                tile.terrain() == grid.terrain_catalog().claimed_floor && tile.owner() == player
            }
            PlacementMode::Anywhere => true,
        }
    }

    fn can_anchor_on(&self, grid: &TileGrid, point: Point, player: PlayerId) -> bool {
        if !grid
            .flags_at(point)
            .intersects(TerrainFlags::WATER | TerrainFlags::LAVA)
        {
            return false;
        }
        match self {
            PlacementMode::ClaimedFloor => point.neighbours4().into_iter().any(|next| {
                grid.tile(next).is_some_and(|tile| {
                    tile.owner() == player
                        && !grid
                            .flags_at(next)
                            .intersects(TerrainFlags::WATER | TerrainFlags::LAVA)
                })
            }),
            PlacementMode::Anywhere => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BuildOutcome {
    Built {
        tiles: usize,
        cost: i32,
        instances: Vec<RoomInstanceId>,
    },
    NoValidTiles,
    Unaffordable {
        cost: i32,
        available: i32,
    },
    NotBuildable,
    UnknownRoom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SellOutcome {
    Sold {
        tiles: usize,
        refunded: i32,
        dropped: i32,
    },
    NothingToSell,
}

/// Incrementally maintained room instances over a [`TileGrid`].
#[derive(Resource, Debug)]
pub struct RoomTopology {
    rooms: Arc<RoomCatalog>,
    ledger: GoldLedger,
    instances: BTreeMap<RoomInstanceId, RoomInstance>,
    tile_index: HashMap<Point, RoomInstanceId>,
    next_id: u32,
}

impl RoomTopology {
    pub fn new(rooms: Arc<RoomCatalog>, ledger: GoldLedger) -> Self {
        Self {
            rooms,
            ledger,
            instances: BTreeMap::new(),
            tile_index: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn ledger(&self) -> &GoldLedger {
        &self.ledger
    }

    pub fn room_catalog(&self) -> &RoomCatalog {
        &self.rooms
    }

    pub fn instance(&self, id: RoomInstanceId) -> Option<&RoomInstance> {
        self.instances.get(&id)
    }

    pub fn instance_id_at(&self, point: Point) -> Option<RoomInstanceId> {
        self.tile_index.get(&point).copied()
    }

    pub fn instance_at(&self, point: Point) -> Option<&RoomInstance> {
        self.instance_id_at(point)
            .and_then(|id| self.instances.get(&id))
    }

    pub fn instances(&self) -> impl Iterator<Item = &RoomInstance> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn indexed_tiles(&self) -> impl Iterator<Item = (Point, RoomInstanceId)> + '_ {
        self.tile_index.iter().map(|(point, id)| (*point, *id))
    }

    /// Room type painted at `point`, if any.
    pub fn room_at<'a>(&'a self, grid: &TileGrid, point: Point) -> Option<&'a RoomDefinition> {
        grid.tile(point)
            .and_then(|tile| self.rooms.by_terrain(tile.terrain()))
    }

    /// Index every room already painted on the map.
    pub fn scan_and_build_initial_rooms(&mut self, grid: &TileGrid) -> MapEvents {
        let points: Vec<Point> = grid.points().collect();
        let events = self.form_rooms(grid, points);
        tracing::info!(
            target: "dungeon::topology",
            instances = self.instances.len(),
            "rooms.initial_scan"
        );
        events
    }

    /// Flood fill every un-indexed room tile among `points`, row-major.
    fn form_rooms(&mut self, grid: &TileGrid, points: impl IntoIterator<Item = Point>) -> MapEvents {
        let mut events = MapEvents::default();
        let ordered: BTreeSet<Point> = points.into_iter().collect();
        let rooms = Arc::clone(&self.rooms);
        for seed in ordered {
            if self.tile_index.contains_key(&seed) {
                continue;
            }
            let Some(room) = self.room_at(grid, seed).map(|room| room.id) else {
                continue;
            };
            let Some(room) = rooms.get(room) else {
                continue;
            };
            let Some(owner) = grid.tile(seed).map(|tile| tile.owner()) else {
                continue;
            };
            let tiles = self.flood_fill_room(grid, seed, room.id, owner);
            let id = self.create_instance(room, owner, tiles);
            if let Some(instance) = self.instances.get(&id) {
                events.rooms.push(instance.lifecycle(RoomEventKind::Built, owner));
            }
        }
        events
    }

    fn flood_fill_room(
        &self,
        grid: &TileGrid,
        seed: Point,
        room: RoomId,
        owner: PlayerId,
    ) -> BTreeSet<Point> {
        let mut tiles = BTreeSet::from([seed]);
        let mut queue = VecDeque::from([seed]);
        while let Some(point) = queue.pop_front() {
            for next in point.neighbours4() {
                if tiles.contains(&next) || self.tile_index.contains_key(&next) {
                    continue;
                }
                let same_room = self.room_at(grid, next).is_some_and(|def| def.id == room);
                let same_owner = grid.tile(next).is_some_and(|tile| tile.owner() == owner);
                if same_room && same_owner {
                    tiles.insert(next);
                    queue.push_back(next);
                }
            }
        }
        debug!("flood fill from {} covered {} tiles", seed, tiles.len());
        tiles
    }

    fn create_instance(
        &mut self,
        room: &RoomDefinition,
        owner: PlayerId,
        tiles: BTreeSet<Point>,
    ) -> RoomInstanceId {
        let id = RoomInstanceId(self.next_id);
        self.next_id += 1;
        for &point in &tiles {
            self.tile_index.insert(point, id);
        }
        self.ledger
            .transaction(|ledger| ledger.attach_room(id, owner, room, &tiles));
        tracing::debug!(
            target: "dungeon::topology",
            room = %room.name,
            instance = id.0,
            owner = owner.0,
            tiles = tiles.len(),
            "room.created"
        );
        self.instances.insert(
            id,
            RoomInstance {
                id,
                room: room.id,
                owner,
                coordinates: tiles,
                destroyed: false,
            },
        );
        id
    }

    /// Instances of `room` owned by `owner` that share an edge with `tiles`,
    /// in the order an 8-neighbourhood scan meets them.
    fn adjacent_instances(
        &self,
        tiles: &BTreeSet<Point>,
        room: RoomId,
        owner: PlayerId,
        exclude: Option<RoomInstanceId>,
    ) -> Vec<RoomInstanceId> {
        let mut found = Vec::new();
        for &point in tiles {
            for next in point.neighbours8() {
                if !point.is_edge_adjacent(next) {
                    continue;
                }
                let Some(&id) = self.tile_index.get(&next) else {
                    continue;
                };
                if Some(id) == exclude || found.contains(&id) {
                    continue;
                }
                if self
                    .instances
                    .get(&id)
                    .is_some_and(|instance| instance.room == room && instance.owner == owner)
                {
                    found.push(id);
                }
            }
        }
        found
    }

    /// Fold `absorbed` instances and `extra` tiles into `target`.
    fn absorb_into(
        &mut self,
        target: RoomInstanceId,
        absorbed: &[RoomInstanceId],
        extra: &BTreeSet<Point>,
    ) -> Vec<GoldDrop> {
        let mut union = self
            .instances
            .get(&target)
            .map(|instance| instance.coordinates.clone())
            .unwrap_or_default();
        union.extend(extra.iter().copied());
        for id in absorbed {
            if let Some(instance) = self.instances.remove(id) {
                union.extend(instance.coordinates);
            }
        }
        for &point in &union {
            self.tile_index.insert(point, target);
        }
        let drops = self
            .ledger
            .transaction(|ledger| ledger.merge_rooms(target, absorbed, &union));
        if let Some(instance) = self.instances.get_mut(&target) {
            tracing::debug!(
                target: "dungeon::topology",
                instance = target.0,
                absorbed = absorbed.len(),
                tiles = union.len(),
                "room.merged"
            );
            instance.coordinates = union;
        }
        drops
    }

    /// Paint `room_id` over the rectangle `start..=end` for `player`.
    ///
    /// Water and lava rooms ignore the raw rectangle and instead cover the
    /// liquid bodies reached from valid anchor tiles inside it. Nothing
    /// changes unless the player can pay for every tile.
    pub fn build(
        &mut self,
        grid: &mut TileGrid,
        start: Point,
        end: Point,
        player: PlayerId,
        room_id: RoomId,
        placement: &impl PlacementRules,
    ) -> (BuildOutcome, MapEvents) {
        let rooms = Arc::clone(&self.rooms);
        let Some(room) = rooms.get(room_id) else {
            return (BuildOutcome::UnknownRoom, MapEvents::default());
        };
        if !room.buildable || room.construction.is_fixed() {
            return (BuildOutcome::NotBuildable, MapEvents::default());
        }
        let Some(rect) = grid.clamp_rect(start, end) else {
            return (BuildOutcome::NoValidTiles, MapEvents::default());
        };

        let candidates: BTreeSet<Point> = if room.is_liquid_placed() {
            let anchors: Vec<Point> = rect
                .points()
                .filter(|&point| {
                    liquid_matches(grid, point, room.placement)
                        && placement.can_anchor_on(grid, point, player)
                })
                .collect();
            get_terrain_batches(grid, &anchors, rect)
                .into_iter()
                .flatten()
                .collect()
        } else {
            rect.points()
                .filter(|&point| {
                    !self.tile_index.contains_key(&point)
                        && placement.can_build_on(grid, point, player)
                })
                .collect()
        };
        if candidates.is_empty() {
            return (BuildOutcome::NoValidTiles, MapEvents::default());
        }

        let cost = room.cost * candidates.len() as i32;
        if let Err(available) = self.ledger.try_spend(player, cost) {
            tracing::info!(
                target: "dungeon::topology",
                player = player.0,
                room = %room.name,
                cost,
                available,
                "room.build_unaffordable"
            );
            return (BuildOutcome::Unaffordable { cost, available }, MapEvents::default());
        }

        let mut events = MapEvents::default();
        for &point in &candidates {
            let previous = grid.tile(point).map(|tile| tile.terrain());
            if grid
                .flags_at(point)
                .intersects(TerrainFlags::WATER | TerrainFlags::LAVA)
            {
                grid.set_underlay(point, previous);
            }
            grid.set_terrain(point, room.terrain);
            grid.set_owner(point, player);
            grid.clear_selection(point);
        }

        let mut touched = Vec::new();
        for component in connected_components(&candidates) {
            let neighbours = self.adjacent_instances(&component, room.id, player, None);
            match neighbours.split_first() {
                None => {
                    let id = self.create_instance(room, player, component);
                    if let Some(instance) = self.instances.get(&id) {
                        events.rooms.push(instance.lifecycle(RoomEventKind::Built, player));
                    }
                    touched.push(id);
                }
                Some((&target, absorbed)) => {
                    let drops = self.absorb_into(target, absorbed, &component);
                    events.drops.extend(drops);
                    if !touched.contains(&target) {
                        touched.push(target);
                    }
                    touched.retain(|id| !absorbed.contains(id));
                }
            }
        }

        touch_surroundings(grid, &candidates, &mut events);
        events.actions.push(PlayerActionEvent {
            kind: PlayerActionKind::Build,
            player,
            tiles: candidates.iter().copied().collect(),
        });
        tracing::info!(
            target: "dungeon::topology",
            player = player.0,
            room = %room.name,
            tiles = candidates.len(),
            cost,
            "room.built"
        );
        (
            BuildOutcome::Built {
                tiles: candidates.len(),
                cost,
                instances: touched,
            },
            events,
        )
    }

    /// Sell every sellable room tile of `player` inside `start..=end`.
    pub fn sell(
        &mut self,
        grid: &mut TileGrid,
        start: Point,
        end: Point,
        player: PlayerId,
        rules: &GameRules,
    ) -> (SellOutcome, MapEvents) {
        let Some(rect) = grid.clamp_rect(start, end) else {
            return (SellOutcome::NothingToSell, MapEvents::default());
        };
        let rooms = Arc::clone(&self.rooms);

        let mut sold = BTreeSet::new();
        let mut refunds = Vec::new();
        let mut touched = BTreeSet::new();
        for point in rect.points() {
            let Some(instance) = self.instance_at(point) else {
                continue;
            };
            if instance.owner != player {
                continue;
            }
            let Some(room) = rooms.get(instance.room) else {
                continue;
            };
            if !room.sellable || room.construction.is_fixed() {
                continue;
            }
            touched.insert(instance.id);

            let underlay = grid.tile(point).and_then(|tile| tile.underlay());
            match underlay {
                Some(liquid) => {
                    grid.set_terrain(point, liquid);
                    grid.set_owner(point, PlayerId::NEUTRAL);
                    grid.set_underlay(point, None);
                }
                None => {
                    let catalog = grid.terrain_catalog();
                    let reverted = catalog
                        .get(room.terrain)
                        .and_then(|def| def.destroyed_terrain)
                        .unwrap_or(catalog.claimed_floor);
                    grid.set_terrain(point, reverted);
                }
            }
            grid.clear_selection(point);
            refunds.push((point, rules.sell_refund(room.cost)));
            sold.insert(point);
        }
        if sold.is_empty() {
            return (SellOutcome::NothingToSell, MapEvents::default());
        }

        let affected: BTreeSet<Point> = touched
            .iter()
            .filter_map(|id| self.instances.get(id))
            .flat_map(|instance| instance.coordinates.iter().copied())
            .collect();
        let touched: Vec<RoomInstanceId> = touched.into_iter().collect();

        let (_, mut events) = self.remove_room_instances(&touched);
        events.extend(self.form_rooms(grid, affected.iter().copied()));

        let mut refunded = 0;
        let mut dropped = 0;
        self.ledger.transaction(|ledger| {
            for &(point, amount) in &refunds {
                let remainder = ledger.add_gold(player, amount, None);
                refunded += amount - remainder;
                dropped += remainder;
                events.drop_gold(point, remainder);
            }
        });

        touch_surroundings(grid, &affected, &mut events);
        events.actions.push(PlayerActionEvent {
            kind: PlayerActionKind::Sold,
            player,
            tiles: sold.iter().copied().collect(),
        });
        tracing::info!(
            target: "dungeon::topology",
            player = player.0,
            tiles = sold.len(),
            refunded,
            dropped,
            "room.sold"
        );
        (
            SellOutcome::Sold {
                tiles: sold.len(),
                refunded,
                dropped,
            },
            events,
        )
    }

    /// Destroy whole instances: controls are torn down (stored gold leaves
    /// the owner's account as drops) and their tiles are unindexed.
    pub fn remove_room_instances(
        &mut self,
        ids: &[RoomInstanceId],
    ) -> (Vec<RoomInstance>, MapEvents) {
        let mut events = MapEvents::default();
        let mut removed = Vec::new();
        for id in ids {
            let Some(mut instance) = self.instances.remove(id) else {
                continue;
            };
            for point in &instance.coordinates {
                if self.tile_index.get(point) == Some(id) {
                    self.tile_index.remove(point);
                }
            }
            let drops = self.ledger.transaction(|ledger| ledger.detach_room(*id));
            events.drops.extend(drops);
            instance.destroyed = true;
            events
                .rooms
                .push(instance.lifecycle(RoomEventKind::Sold, instance.owner));
            tracing::debug!(
                target: "dungeon::topology",
                instance = id.0,
                owner = instance.owner.0,
                tiles = instance.len(),
                "room.removed"
            );
            removed.push(instance);
        }
        (removed, events)
    }

    /// Hand a whole instance to `new_owner`, restoring every tile to full
    /// health, then merge it with the new owner's adjacent rooms of the same
    /// type.
    pub fn capture_room(
        &mut self,
        grid: &mut TileGrid,
        id: RoomInstanceId,
        new_owner: PlayerId,
    ) -> MapEvents {
        let mut events = MapEvents::default();
        let Some(instance) = self.instances.get_mut(&id) else {
            return events;
        };
        let previous = std::mem::replace(&mut instance.owner, new_owner);
        let coordinates = instance.coordinates.clone();
        let room = instance.room;
        for &point in &coordinates {
            grid.set_owner(point, new_owner);
            let max = grid.tile(point).map(|tile| tile.max_health()).unwrap_or(0);
            grid.set_health(point, max);
        }
        self.ledger
            .transaction(|ledger| ledger.transfer_room(id, new_owner));

        if let Some(instance) = self.instances.get(&id) {
            events
                .rooms
                .push(instance.lifecycle(RoomEventKind::Captured, new_owner));
            events
                .rooms
                .push(instance.lifecycle(RoomEventKind::CapturedByEnemy, previous));
        }
        tracing::info!(
            target: "dungeon::topology",
            instance = id.0,
            from = previous.0,
            to = new_owner.0,
            tiles = coordinates.len(),
            "room.captured"
        );

        let neighbours = self.adjacent_instances(&coordinates, room, new_owner, Some(id));
        if !neighbours.is_empty() {
            let drops = self.absorb_into(id, &neighbours, &BTreeSet::new());
            events.drops.extend(drops);
        }

        let covered = self
            .instances
            .get(&id)
            .map(|instance| instance.coordinates.clone())
            .unwrap_or(coordinates);
        touch_surroundings(grid, &covered, &mut events);
        events
    }
}

/// Flood fill by raw terrain id from each start point, staying inside
/// `bounds`. One batch per connected component; start points already covered
/// by an earlier batch are skipped.
pub fn get_terrain_batches(
    grid: &TileGrid,
    start_points: &[Point],
    bounds: TileRect,
) -> Vec<BTreeSet<Point>> {
    let mut visited: BTreeSet<Point> = BTreeSet::new();
    let mut batches = Vec::new();
    for &seed in start_points {
        if visited.contains(&seed) || !bounds.contains(seed) {
            continue;
        }
        let Some(terrain) = grid.tile(seed).map(|tile| tile.terrain()) else {
            continue;
        };
        let mut batch = BTreeSet::from([seed]);
        let mut work = vec![seed];
        visited.insert(seed);
        while let Some(point) = work.pop() {
            for next in point.neighbours4() {
                if !bounds.contains(next) || visited.contains(&next) {
                    continue;
                }
                if grid.tile(next).is_some_and(|tile| tile.terrain() == terrain) {
                    visited.insert(next);
                    batch.insert(next);
                    work.push(next);
                }
            }
        }
        batches.push(batch);
    }
    batches
}

fn liquid_matches(grid: &TileGrid, point: Point, placement: PlacementFlags) -> bool {
    let flags = grid.flags_at(point);
    (placement.contains(PlacementFlags::WATER) && flags.contains(TerrainFlags::WATER))
        || (placement.contains(PlacementFlags::LAVA) && flags.contains(TerrainFlags::LAVA))
}

/// Split a tile set into 4-connected components, ordered by first tile.
fn connected_components(tiles: &BTreeSet<Point>) -> Vec<BTreeSet<Point>> {
    let mut remaining = tiles.clone();
    let mut components = Vec::new();
    while let Some(seed) = remaining.pop_first() {
        let mut component = BTreeSet::from([seed]);
        let mut work = vec![seed];
        while let Some(point) = work.pop() {
            for next in point.neighbours4() {
                if remaining.remove(&next) {
                    component.insert(next);
                    work.push(next);
                }
            }
        }
        components.push(component);
    }
    components
}

fn touch_surroundings(grid: &TileGrid, tiles: &BTreeSet<Point>, events: &mut MapEvents) {
    for &point in tiles {
        events.touch(point);
        for next in point.neighbours8() {
            if grid.in_bounds(next) {
                events.touch(next);
            }
        }
    }
}
