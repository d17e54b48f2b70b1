//! Read-only terrain and room catalogs.
//!
//! Both catalogs are loaded from JSON (`src/data/*.json` by default, with
//! environment overrides) and validated once; the simulation only ever reads
//! them through an `Arc`.

use std::{
    collections::{BTreeMap, HashMap},
    env, fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BUILTIN_TERRAIN_CATALOG: &str = include_str!("data/terrain_catalog.json");
pub const BUILTIN_ROOM_CATALOG: &str = include_str!("data/room_catalog.json");

/// Identifier of a terrain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerrainId(pub u16);

impl fmt::Display for TerrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a room type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u16);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TerrainFlags: u16 {
        const SOLID = 1 << 0;
        const OWNABLE = 1 << 1;
        const ROOM = 1 << 2;
        const TAGGABLE = 1 << 3;
        const IMPENETRABLE = 1 << 4;
        const DECAY = 1 << 5;
        const WATER = 1 << 6;
        const LAVA = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PlacementFlags: u8 {
        const LAND = 1 << 0;
        const WATER = 1 << 1;
        const LAVA = 1 << 2;
    }
}

impl Default for PlacementFlags {
    fn default() -> Self {
        PlacementFlags::LAND
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainDefinition {
    pub id: TerrainId,
    pub name: String,
    pub flags: TerrainFlags,
    pub max_health: i32,
    #[serde(default)]
    pub destroyed_terrain: Option<TerrainId>,
    #[serde(default)]
    pub max_health_terrain: Option<TerrainId>,
    #[serde(default)]
    pub mana_gain: i32,
    #[serde(default)]
    pub starting_gold: i32,
}

impl TerrainDefinition {
    #[inline]
    pub fn has(&self, flags: TerrainFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn is_solid(&self) -> bool {
        self.has(TerrainFlags::SOLID)
    }

    pub fn is_room(&self) -> bool {
        self.has(TerrainFlags::ROOM)
    }

    pub fn is_liquid(&self) -> bool {
        self.flags
            .intersects(TerrainFlags::WATER | TerrainFlags::LAVA)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainCatalog {
    pub version: u32,
    pub water: TerrainId,
    pub lava: TerrainId,
    pub unclaimed_floor: TerrainId,
    pub claimed_floor: TerrainId,
    terrains: Vec<TerrainDefinition>,
    #[serde(skip)]
    index: HashMap<TerrainId, usize>,
}

impl TerrainCatalog {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            Self::from_json_str(BUILTIN_TERRAIN_CATALOG)
                .expect("builtin terrain catalog should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let mut catalog: TerrainCatalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn get(&self, id: TerrainId) -> Option<&TerrainDefinition> {
        self.index.get(&id).map(|&idx| &self.terrains[idx])
    }

    pub fn by_name(&self, name: &str) -> Option<&TerrainDefinition> {
        self.terrains.iter().find(|terrain| terrain.name == name)
    }

    pub fn terrains(&self) -> impl Iterator<Item = &TerrainDefinition> {
        self.terrains.iter()
    }

    /// Max health for a terrain id; unknown ids are treated as indestructible.
    pub fn max_health(&self, id: TerrainId) -> i32 {
        self.get(id).map(|terrain| terrain.max_health).unwrap_or(0)
    }

    pub fn flags(&self, id: TerrainId) -> TerrainFlags {
        self.get(id)
            .map(|terrain| terrain.flags)
            .unwrap_or(TerrainFlags::empty())
    }

    fn validate(&mut self) -> Result<(), CatalogError> {
        self.index.clear();
        for (idx, terrain) in self.terrains.iter().enumerate() {
            if self.index.insert(terrain.id, idx).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "terrain",
                    id: terrain.id.0,
                });
            }
            if terrain.max_health < 0 {
                return Err(CatalogError::Invalid {
                    context: format!("terrain {} has negative max health", terrain.name),
                });
            }
        }

        for terrain in &self.terrains {
            for reference in [terrain.destroyed_terrain, terrain.max_health_terrain]
                .into_iter()
                .flatten()
            {
                if !self.index.contains_key(&reference) {
                    return Err(CatalogError::UnknownTerrain {
                        context: terrain.name.clone(),
                        id: reference.0,
                    });
                }
            }
        }

        for (context, id) in [
            ("water", self.water),
            ("lava", self.lava),
            ("unclaimed_floor", self.unclaimed_floor),
            ("claimed_floor", self.claimed_floor),
        ] {
            if !self.index.contains_key(&id) {
                return Err(CatalogError::UnknownTerrain {
                    context: context.to_string(),
                    id: id.0,
                });
            }
        }
        Ok(())
    }
}

/// How a room's tiles are laid down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionShape {
    #[default]
    Normal,
    Quad,
    ThreeByThree,
    FiveByFive,
}

impl ConstructionShape {
    /// Fixed-shape rooms are placed by the level, never painted by players.
    pub fn is_fixed(self) -> bool {
        matches!(
            self,
            ConstructionShape::ThreeByThree | ConstructionShape::FiveByFive
        )
    }
}

/// Storage function provided by a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomFunction {
    Gold,
    Lair,
    Prisoner,
    Spellbook,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StorageSpec {
    pub function: RoomFunction,
    pub capacity_per_tile: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomDefinition {
    pub id: RoomId,
    pub name: String,
    pub terrain: TerrainId,
    #[serde(default)]
    pub construction: ConstructionShape,
    #[serde(default)]
    pub placement: PlacementFlags,
    pub cost: i32,
    #[serde(default = "default_true")]
    pub buildable: bool,
    #[serde(default = "default_true")]
    pub sellable: bool,
    #[serde(default)]
    pub storage: Vec<StorageSpec>,
}

impl RoomDefinition {
    pub fn stores(&self, function: RoomFunction) -> bool {
        self.storage.iter().any(|spec| spec.function == function)
    }

    pub fn capacity_per_tile(&self, function: RoomFunction) -> i32 {
        self.storage
            .iter()
            .find(|spec| spec.function == function)
            .map(|spec| spec.capacity_per_tile)
            .unwrap_or(0)
    }

    /// Placed on water/lava bodies instead of land rectangles.
    pub fn is_liquid_placed(&self) -> bool {
        self.placement
            .intersects(PlacementFlags::WATER | PlacementFlags::LAVA)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomCatalog {
    pub version: u32,
    rooms: Vec<RoomDefinition>,
    #[serde(skip)]
    by_id: HashMap<RoomId, usize>,
    #[serde(skip)]
    by_terrain: HashMap<TerrainId, usize>,
}

impl RoomCatalog {
    /// The shipped room catalog, validated against `terrain`. Fails when the
    /// terrain catalog lacks a terrain the builtin rooms paint.
    pub fn builtin(terrain: &TerrainCatalog) -> Result<Arc<Self>, CatalogError> {
        Self::from_json_str(BUILTIN_ROOM_CATALOG, terrain).map(Arc::new)
    }

    pub fn from_json_str(json: &str, terrain: &TerrainCatalog) -> Result<Self, CatalogError> {
        let mut catalog: RoomCatalog = serde_json::from_str(json)?;
        catalog.validate(terrain)?;
        Ok(catalog)
    }

    pub fn from_file(path: &Path, terrain: &TerrainCatalog) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents, terrain)
    }

    pub fn get(&self, id: RoomId) -> Option<&RoomDefinition> {
        self.by_id.get(&id).map(|&idx| &self.rooms[idx])
    }

    pub fn by_name(&self, name: &str) -> Option<&RoomDefinition> {
        self.rooms
            .iter()
            .find(|room| room.name.eq_ignore_ascii_case(name))
    }

    /// Room painted with the given terrain, if that terrain is a room terrain.
    pub fn by_terrain(&self, terrain: TerrainId) -> Option<&RoomDefinition> {
        self.by_terrain.get(&terrain).map(|&idx| &self.rooms[idx])
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomDefinition> {
        self.rooms.iter()
    }

    fn validate(&mut self, terrain: &TerrainCatalog) -> Result<(), CatalogError> {
        self.by_id.clear();
        self.by_terrain.clear();
        for (idx, room) in self.rooms.iter().enumerate() {
            if self.by_id.insert(room.id, idx).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "room",
                    id: room.id.0,
                });
            }
            let Some(painted) = terrain.get(room.terrain) else {
                return Err(CatalogError::UnknownTerrain {
                    context: room.name.clone(),
                    id: room.terrain.0,
                });
            };
            if !painted.is_room() {
                return Err(CatalogError::Invalid {
                    context: format!(
                        "room {} paints terrain {} which lacks the ROOM flag",
                        room.name, painted.name
                    ),
                });
            }
            if self.by_terrain.insert(room.terrain, idx).is_some() {
                return Err(CatalogError::Invalid {
                    context: format!("terrain {} is painted by more than one room", painted.name),
                });
            }
            if room.cost < 0 {
                return Err(CatalogError::Invalid {
                    context: format!("room {} has negative cost", room.name),
                });
            }
        }

        let unmapped: Vec<&str> = terrain
            .terrains()
            .filter(|def| def.is_room() && !self.by_terrain.contains_key(&def.id))
            .map(|def| def.name.as_str())
            .collect();
        if !unmapped.is_empty() {
            return Err(CatalogError::Invalid {
                context: format!("room terrains without a room entry: {}", unmapped.join(", ")),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read catalog from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("duplicate {kind} id {id}")]
    Duplicate { kind: &'static str, id: u16 },
    #[error("{context} references unknown terrain {id}")]
    UnknownTerrain { context: String, id: u16 },
    #[error("invalid catalog: {context}")]
    Invalid { context: String },
}

/// Handle for the catalogs shared across systems and command handlers.
#[derive(Resource, Debug, Clone)]
pub struct CatalogHandle {
    terrain: Arc<TerrainCatalog>,
    rooms: Arc<RoomCatalog>,
}

impl CatalogHandle {
    pub fn new(terrain: Arc<TerrainCatalog>, rooms: Arc<RoomCatalog>) -> Self {
        Self { terrain, rooms }
    }

    pub fn builtin() -> Self {
        let terrain = TerrainCatalog::builtin();
        let rooms = RoomCatalog::builtin(&terrain).expect("builtin room catalog should parse");
        Self { terrain, rooms }
    }

    pub fn terrain(&self) -> Arc<TerrainCatalog> {
        Arc::clone(&self.terrain)
    }

    pub fn rooms(&self) -> Arc<RoomCatalog> {
        Arc::clone(&self.rooms)
    }

    /// Room names keyed by id, handy for logs and status output.
    pub fn room_names(&self) -> BTreeMap<RoomId, String> {
        self.rooms
            .rooms()
            .map(|room| (room.id, room.name.clone()))
            .collect()
    }
}

/// Load both catalogs from `DUNGEON_TERRAIN_PATH` / `DUNGEON_ROOMS_PATH`.
/// See [`load_catalogs`].
pub fn load_catalogs_from_env() -> Result<CatalogHandle, CatalogError> {
    let terrain = env::var("DUNGEON_TERRAIN_PATH").ok().map(PathBuf::from);
    let rooms = env::var("DUNGEON_ROOMS_PATH").ok().map(PathBuf::from);
    load_catalogs(terrain.as_deref(), rooms.as_deref())
}

/// Load the catalogs from optional override files, falling back to the
/// builtin data when a file is missing or invalid.
///
/// The builtin rooms are validated against whichever terrain catalog ended up
/// in use, so a custom terrain file without a rooms file must still define
/// every terrain the builtin rooms paint.
pub fn load_catalogs(
    terrain_path: Option<&Path>,
    rooms_path: Option<&Path>,
) -> Result<CatalogHandle, CatalogError> {
    let terrain = match terrain_path {
        Some(path) => match TerrainCatalog::from_file(path) {
            Ok(catalog) => {
                tracing::info!(
                    target: "dungeon::config",
                    path = %path.display(),
                    "terrain_catalog.loaded=file"
                );
                Arc::new(catalog)
            }
            Err(err) => {
                tracing::warn!(
                    target: "dungeon::config",
                    path = %path.display(),
                    error = %err,
                    "terrain_catalog.load_failed"
                );
                TerrainCatalog::builtin()
            }
        },
        None => TerrainCatalog::builtin(),
    };

    let rooms = match rooms_path {
        Some(path) => match RoomCatalog::from_file(path, &terrain) {
            Ok(catalog) => {
                tracing::info!(
                    target: "dungeon::config",
                    path = %path.display(),
                    "room_catalog.loaded=file"
                );
                Arc::new(catalog)
            }
            Err(err) => {
                tracing::warn!(
                    target: "dungeon::config",
                    path = %path.display(),
                    error = %err,
                    "room_catalog.load_failed"
                );
                RoomCatalog::builtin(&terrain)?
            }
        },
        None => RoomCatalog::builtin(&terrain)?,
    };

    Ok(CatalogHandle::new(terrain, rooms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogs_parse() {
        let handle = CatalogHandle::builtin();
        let terrain = handle.terrain();
        let rooms = handle.rooms();
        let treasury = rooms.by_name("Treasury").unwrap();
        assert!(treasury.stores(RoomFunction::Gold));
        assert!(terrain.get(treasury.terrain).unwrap().is_room());
        assert_eq!(rooms.by_terrain(treasury.terrain).unwrap().id, treasury.id);
    }

    #[test]
    fn flags_parse_from_text() {
        let terrain = TerrainCatalog::builtin();
        let gem = terrain.by_name("gem_seam").unwrap();
        assert!(gem.has(TerrainFlags::SOLID | TerrainFlags::IMPENETRABLE));
        assert!(!gem.has(TerrainFlags::OWNABLE));

        let rooms = RoomCatalog::builtin(&terrain).unwrap();
        let bridge = rooms.by_name("bridge").unwrap();
        assert!(bridge.is_liquid_placed());
        assert!(!bridge.placement.contains(PlacementFlags::LAND));
        assert!(rooms.by_name("dungeon_heart").unwrap().construction.is_fixed());
    }

    #[test]
    fn duplicate_terrain_is_rejected() {
        let json = r#"{
            "version": 1, "water": 1, "lava": 1, "unclaimed_floor": 1, "claimed_floor": 1,
            "terrains": [
                { "id": 1, "name": "a", "flags": "SOLID", "max_health": 1 },
                { "id": 1, "name": "b", "flags": "SOLID", "max_health": 1 }
            ]
        }"#;
        assert!(matches!(
            TerrainCatalog::from_json_str(json),
            Err(CatalogError::Duplicate { kind: "terrain", id: 1 })
        ));
    }

    #[test]
    fn room_terrain_must_carry_room_flag() {
        let terrain = TerrainCatalog::builtin();
        let json = r#"{
            "version": 1,
            "rooms": [{ "id": 1, "name": "bogus", "terrain": 2, "cost": 10 }]
        }"#;
        assert!(matches!(
            RoomCatalog::from_json_str(json, &terrain),
            Err(CatalogError::Invalid { .. })
        ));
    }
}
