use std::{cmp::Ordering, collections::BTreeSet, fmt, sync::Arc};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{TerrainCatalog, TerrainDefinition, TerrainFlags, TerrainId},
    players::PlayerId,
};

/// Tile coordinate. Ordered row-major (`y` first) so sorted sets scan like the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// North, east, south, west.
    pub fn neighbours4(self) -> [Point; 4] {
        [
            Point::new(self.x, self.y - 1),
            Point::new(self.x + 1, self.y),
            Point::new(self.x, self.y + 1),
            Point::new(self.x - 1, self.y),
        ]
    }

    /// All eight surrounding points, clockwise from north.
    pub fn neighbours8(self) -> [Point; 8] {
        [
            Point::new(self.x, self.y - 1),
            Point::new(self.x + 1, self.y - 1),
            Point::new(self.x + 1, self.y),
            Point::new(self.x + 1, self.y + 1),
            Point::new(self.x, self.y + 1),
            Point::new(self.x - 1, self.y + 1),
            Point::new(self.x - 1, self.y),
            Point::new(self.x - 1, self.y - 1),
        ]
    }

    pub fn is_edge_adjacent(self, other: Point) -> bool {
        (self.x - other.x).abs() + (self.y - other.y).abs() == 1
    }
}

impl Ord for Point {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<dungeon_runtime::GridPoint> for Point {
    fn from(value: dungeon_runtime::GridPoint) -> Self {
        Point::new(value.x, value.y)
    }
}

/// Inclusive rectangle of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub min: Point,
    pub max: Point,
}

impl TileRect {
    /// Rectangle spanning two corners given in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Row-major iteration over every point.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        (self.min.y..=self.max.y)
            .flat_map(move |y| (self.min.x..=self.max.x).map(move |x| Point::new(x, y)))
    }
}

/// A single grid cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    x: i32,
    y: i32,
    terrain: TerrainId,
    owner: PlayerId,
    health: i32,
    max_health: i32,
    gold: i32,
    selected_by: BTreeSet<PlayerId>,
    flashed_by: BTreeSet<PlayerId>,
    underlay: Option<TerrainId>,
}

impl Tile {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn terrain(&self) -> TerrainId {
        self.terrain
    }

    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn max_health(&self) -> i32 {
        self.max_health
    }

    pub fn gold(&self) -> i32 {
        self.gold
    }

    /// Liquid terrain hidden under a bridge-like room tile.
    pub fn underlay(&self) -> Option<TerrainId> {
        self.underlay
    }

    pub fn is_selected_by(&self, player: PlayerId) -> bool {
        self.selected_by.contains(&player)
    }

    pub fn selected_by(&self) -> &BTreeSet<PlayerId> {
        &self.selected_by
    }

    pub fn is_flashed_by(&self, player: PlayerId) -> bool {
        self.flashed_by.contains(&player)
    }

    pub fn is_at_max_health(&self) -> bool {
        self.health >= self.max_health
    }

    /// Remove up to `amount` gold from the tile's reserve, returning what was taken.
    pub fn mine_gold(&mut self, amount: i32) -> i32 {
        let mined = amount.max(0).min(self.gold);
        self.gold -= mined;
        mined
    }
}

/// Fixed-size terrain grid.
///
/// All accessors are bounds-checked: reads outside the map yield `None`,
/// writes outside the map return `false` and change nothing.
#[derive(Resource, Debug, Clone)]
pub struct TileGrid {
    width: i32,
    height: i32,
    tiles: Vec<Tile>,
    terrain: Arc<TerrainCatalog>,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, terrain: Arc<TerrainCatalog>, fill: TerrainId) -> Self {
        // Coordinates are i32, so each side is capped at i32::MAX.
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let height = i32::try_from(height).unwrap_or(i32::MAX);
        let (max_health, gold) = terrain
            .get(fill)
            .map(|def| (def.max_health, def.starting_gold))
            .unwrap_or((0, 0));
        let mut tiles = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                tiles.push(Tile {
                    x,
                    y,
                    terrain: fill,
                    owner: PlayerId::NEUTRAL,
                    health: max_health,
                    max_health,
                    gold,
                    selected_by: BTreeSet::new(),
                    flashed_by: BTreeSet::new(),
                    underlay: None,
                });
            }
        }
        Self {
            width,
            height,
            tiles,
            terrain,
        }
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn terrain_catalog(&self) -> &TerrainCatalog {
        &self.terrain
    }

    #[inline]
    pub fn in_bounds(&self, point: Point) -> bool {
        point.x >= 0 && point.y >= 0 && point.x < self.width && point.y < self.height
    }

    #[inline]
    fn index(&self, point: Point) -> Option<usize> {
        if self.in_bounds(point) {
            Some(point.y as usize * self.width as usize + point.x as usize)
        } else {
            None
        }
    }

    pub fn get(&self, x: i32, y: i32) -> Option<&Tile> {
        self.tile(Point::new(x, y))
    }

    pub fn tile(&self, point: Point) -> Option<&Tile> {
        self.index(point).map(|idx| &self.tiles[idx])
    }

    pub fn tile_mut(&mut self, point: Point) -> Option<&mut Tile> {
        self.index(point).map(move |idx| &mut self.tiles[idx])
    }

    /// Catalog entry for the terrain currently at `point`.
    pub fn terrain_at(&self, point: Point) -> Option<&TerrainDefinition> {
        self.tile(point)
            .and_then(|tile| self.terrain.get(tile.terrain))
    }

    pub fn flags_at(&self, point: Point) -> TerrainFlags {
        self.tile(point)
            .map(|tile| self.terrain.flags(tile.terrain))
            .unwrap_or(TerrainFlags::empty())
    }

    /// Change terrain; health resets to the new terrain's maximum.
    pub fn set_terrain(&mut self, point: Point, terrain: TerrainId) -> bool {
        let max_health = self.terrain.max_health(terrain);
        match self.tile_mut(point) {
            Some(tile) => {
                tile.terrain = terrain;
                tile.max_health = max_health;
                tile.health = max_health;
                true
            }
            None => false,
        }
    }

    pub fn set_owner(&mut self, point: Point, owner: PlayerId) -> bool {
        match self.tile_mut(point) {
            Some(tile) => {
                tile.owner = owner;
                true
            }
            None => false,
        }
    }

    /// Set health, clamped into `0..=max_health`.
    pub fn set_health(&mut self, point: Point, health: i32) -> bool {
        match self.tile_mut(point) {
            Some(tile) => {
                tile.health = health.clamp(0, tile.max_health);
                true
            }
            None => false,
        }
    }

    pub fn set_gold(&mut self, point: Point, gold: i32) -> bool {
        match self.tile_mut(point) {
            Some(tile) => {
                tile.gold = gold.max(0);
                true
            }
            None => false,
        }
    }

    pub fn set_underlay(&mut self, point: Point, underlay: Option<TerrainId>) -> bool {
        match self.tile_mut(point) {
            Some(tile) => {
                tile.underlay = underlay;
                true
            }
            None => false,
        }
    }

    pub fn set_selected(&mut self, point: Point, player: PlayerId, selected: bool) -> bool {
        let taggable = self.flags_at(point).contains(TerrainFlags::TAGGABLE);
        match self.tile_mut(point) {
            Some(tile) => {
                if selected && taggable {
                    tile.selected_by.insert(player)
                } else {
                    tile.selected_by.remove(&player)
                }
            }
            None => false,
        }
    }

    pub fn set_flashed(&mut self, point: Point, player: PlayerId, flashed: bool) -> bool {
        match self.tile_mut(point) {
            Some(tile) => {
                if flashed {
                    tile.flashed_by.insert(player)
                } else {
                    tile.flashed_by.remove(&player)
                }
            }
            None => false,
        }
    }

    /// Drop every player's selection of the tile.
    pub fn clear_selection(&mut self, point: Point) -> bool {
        match self.tile_mut(point) {
            Some(tile) => {
                tile.selected_by.clear();
                true
            }
            None => false,
        }
    }

    /// Level setup helper: terrain, owner and the terrain's starting gold in one go.
    pub fn paint(&mut self, point: Point, terrain: TerrainId, owner: PlayerId) -> bool {
        let gold = self
            .terrain
            .get(terrain)
            .map(|def| def.starting_gold)
            .unwrap_or(0);
        self.set_terrain(point, terrain) && self.set_owner(point, owner) && self.set_gold(point, gold)
    }

    /// Clamp a rectangle to the map; `None` when it lies entirely outside.
    pub fn clamp_rect(&self, a: Point, b: Point) -> Option<TileRect> {
        let rect = TileRect::from_corners(a, b);
        if rect.max.x < 0 || rect.max.y < 0 || rect.min.x >= self.width || rect.min.y >= self.height
        {
            return None;
        }
        Some(TileRect {
            min: Point::new(rect.min.x.max(0), rect.min.y.max(0)),
            max: Point::new(
                rect.max.x.min(self.width - 1),
                rect.max.y.min(self.height - 1),
            ),
        })
    }

    /// Row-major iteration over every point on the map.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.tiles.iter().map(Tile::point)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    /// Render one character per tile, rows separated by newlines.
    pub fn ascii(&self, glyph: impl Fn(&Tile) -> char) -> String {
        let mut out = String::with_capacity((self.width as usize + 1) * self.height as usize);
        for row in self.tiles.chunks(self.width.max(1) as usize) {
            out.extend(row.iter().map(&glyph));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: u32, height: u32) -> TileGrid {
        let terrain = TerrainCatalog::builtin();
        let earth = terrain.by_name("earth").unwrap().id;
        TileGrid::new(width, height, terrain, earth)
    }

    #[test]
    fn out_of_bounds_reads_are_none() {
        let grid = grid(4, 3);
        assert!(grid.get(0, 0).is_some());
        assert!(grid.get(3, 2).is_some());
        assert!(grid.get(4, 0).is_none());
        assert!(grid.get(0, 3).is_none());
        assert!(grid.get(-1, 0).is_none());
    }

    #[test]
    fn degenerate_sizes_index_row_major() {
        let empty = grid(0, 5);
        assert_eq!(empty.tiles().count(), 0);
        assert!(empty.get(0, 0).is_none());
        assert!(empty.clamp_rect(Point::new(0, 0), Point::new(3, 3)).is_none());

        let tall = grid(1, 7);
        assert_eq!(tall.tiles().count(), 7);
        assert_eq!(tall.get(0, 6).map(Tile::point), Some(Point::new(0, 6)));
        let wide = grid(9, 1);
        assert_eq!(wide.get(8, 0).map(Tile::point), Some(Point::new(8, 0)));
    }

    #[test]
    fn out_of_bounds_writes_are_ignored() {
        let mut grid = grid(2, 2);
        let before: Vec<Tile> = grid.tiles().cloned().collect();
        assert!(!grid.set_owner(Point::new(5, 5), PlayerId(1)));
        assert!(!grid.set_health(Point::new(-1, 0), 3));
        assert!(!grid.set_gold(Point::new(2, 0), 10));
        let after: Vec<Tile> = grid.tiles().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn health_is_clamped_to_terrain_max() {
        let mut grid = grid(2, 2);
        let point = Point::new(1, 1);
        assert!(grid.set_health(point, 1_000));
        assert_eq!(grid.tile(point).unwrap().health(), 100);
        assert!(grid.set_health(point, -5));
        assert_eq!(grid.tile(point).unwrap().health(), 0);
    }

    #[test]
    fn set_terrain_restores_max_health() {
        let mut grid = grid(2, 2);
        let point = Point::new(0, 1);
        grid.set_health(point, 10);
        let wall = grid.terrain_catalog().by_name("reinforced_wall").unwrap().id;
        grid.set_terrain(point, wall);
        let tile = grid.tile(point).unwrap();
        assert_eq!(tile.max_health(), 200);
        assert_eq!(tile.health(), 200);
    }

    #[test]
    fn selection_requires_taggable_terrain() {
        let mut grid = grid(2, 1);
        let water = grid.terrain_catalog().water;
        grid.set_terrain(Point::new(1, 0), water);
        assert!(grid.set_selected(Point::new(0, 0), PlayerId(1), true));
        assert!(!grid.set_selected(Point::new(1, 0), PlayerId(1), true));
        assert!(grid.tile(Point::new(0, 0)).unwrap().is_selected_by(PlayerId(1)));
        grid.clear_selection(Point::new(0, 0));
        assert!(grid.tile(Point::new(0, 0)).unwrap().selected_by().is_empty());
    }

    #[test]
    fn rectangles_clamp_and_scan_row_major() {
        let grid = grid(3, 3);
        let rect = grid
            .clamp_rect(Point::new(2, 5), Point::new(-4, 1))
            .unwrap();
        assert_eq!(rect.min, Point::new(0, 1));
        assert_eq!(rect.max, Point::new(2, 2));
        let points: Vec<Point> = rect.points().collect();
        assert_eq!(points.first(), Some(&Point::new(0, 1)));
        assert_eq!(points[1], Point::new(1, 1));
        assert_eq!(points.len(), 6);
        assert!(grid.clamp_rect(Point::new(5, 5), Point::new(9, 9)).is_none());
    }

    #[test]
    fn points_order_row_major() {
        let mut set = BTreeSet::new();
        set.insert(Point::new(1, 0));
        set.insert(Point::new(0, 1));
        set.insert(Point::new(0, 0));
        let ordered: Vec<Point> = set.into_iter().collect();
        assert_eq!(
            ordered,
            vec![Point::new(0, 0), Point::new(1, 0), Point::new(0, 1)]
        );
    }

    #[test]
    fn mining_never_exceeds_reserve() {
        let mut grid = grid(1, 1);
        let point = Point::new(0, 0);
        grid.set_gold(point, 30);
        let tile = grid.tile_mut(point).unwrap();
        assert_eq!(tile.mine_gold(20), 20);
        assert_eq!(tile.mine_gold(20), 10);
        assert_eq!(tile.mine_gold(20), 0);
        assert_eq!(tile.gold(), 0);
    }

    #[test]
    fn ascii_renders_rows() {
        let mut grid = grid(3, 2);
        grid.set_owner(Point::new(1, 0), PlayerId(1));
        let rendered = grid.ascii(|tile| if tile.owner().is_neutral() { '.' } else { '1' });
        assert_eq!(rendered, ".1.\n...\n");
    }
}
