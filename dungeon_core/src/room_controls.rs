//! Storage strategies attached to room instances.
//!
//! Every room instance owns one control per storage function its room type
//! declares. Controls only track contents and capacity; crediting the owning
//! player's account is the ledger's job.

use std::{collections::BTreeMap, collections::BTreeSet, fmt};

use crate::{
    catalog::{RoomDefinition, RoomFunction},
    grid::Point,
};

/// Contents lifted out of a control, keyed by the tile they sat on.
pub type TileContents = Vec<(Point, i32)>;

pub trait RoomObjectControl: fmt::Debug + Send {
    fn function(&self) -> RoomFunction;

    /// Units currently stored.
    fn current_capacity(&self) -> i32;

    /// Units the instance can hold with its current tile set.
    fn max_capacity(&self) -> i32;

    /// Recompute capacity for a new tile set. Contents that no longer fit are
    /// returned against the tile they were displaced from.
    fn retile(&mut self, tiles: &BTreeSet<Point>) -> TileContents;

    /// Remove and return everything stored.
    fn take_contents(&mut self) -> TileContents;

    /// Take over contents lifted from another control of the same function.
    /// Returns what did not fit.
    fn absorb(&mut self, contents: TileContents) -> TileContents;

    fn as_gold(&self) -> Option<&GoldControl> {
        None
    }

    fn as_gold_mut(&mut self) -> Option<&mut GoldControl> {
        None
    }

    fn free_capacity(&self) -> i32 {
        (self.max_capacity() - self.current_capacity()).max(0)
    }
}

/// Gold vault: every tile holds up to `capacity_per_tile` gold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldControl {
    capacity_per_tile: i32,
    stock: BTreeMap<Point, i32>,
}

impl GoldControl {
    pub fn new(capacity_per_tile: i32, tiles: &BTreeSet<Point>) -> Self {
        Self {
            capacity_per_tile: capacity_per_tile.max(0),
            stock: tiles.iter().map(|&point| (point, 0)).collect(),
        }
    }

    pub fn stored(&self) -> i32 {
        self.stock.values().sum()
    }

    pub fn capacity(&self) -> i32 {
        self.capacity_per_tile * self.stock.len() as i32
    }

    pub fn stock_at(&self, point: Point) -> Option<i32> {
        self.stock.get(&point).copied()
    }

    /// Deposit up to `amount`, filling `start` first when it is one of the
    /// vault's tiles, then the remaining tiles in row-major order.
    pub fn deposit(&mut self, amount: i32, start: Option<Point>) -> i32 {
        let mut remaining = amount.max(0);
        let order: Vec<Point> = start
            .filter(|point| self.stock.contains_key(point))
            .into_iter()
            .chain(self.stock.keys().copied().filter(|point| Some(*point) != start))
            .collect();
        for point in order {
            if remaining == 0 {
                break;
            }
            let Some(held) = self.stock.get_mut(&point) else {
                continue;
            };
            let put = (self.capacity_per_tile - *held).clamp(0, remaining);
            *held += put;
            remaining -= put;
        }
        amount.max(0) - remaining
    }

    /// Withdraw up to `amount`, emptying tiles from the end of the vault first.
    pub fn withdraw(&mut self, amount: i32) -> i32 {
        let mut remaining = amount.max(0);
        for held in self.stock.values_mut().rev() {
            if remaining == 0 {
                break;
            }
            let take = (*held).min(remaining);
            *held -= take;
            remaining -= take;
        }
        amount.max(0) - remaining
    }
}

impl RoomObjectControl for GoldControl {
    fn function(&self) -> RoomFunction {
        RoomFunction::Gold
    }

    fn current_capacity(&self) -> i32 {
        self.stored()
    }

    fn max_capacity(&self) -> i32 {
        self.capacity()
    }

    fn retile(&mut self, tiles: &BTreeSet<Point>) -> TileContents {
        let dropped: Vec<Point> = self
            .stock
            .keys()
            .filter(|point| !tiles.contains(point))
            .copied()
            .collect();
        let mut displaced = Vec::new();
        for point in dropped {
            if let Some(held) = self.stock.remove(&point) {
                if held > 0 {
                    displaced.push((point, held));
                }
            }
        }
        for &point in tiles {
            self.stock.entry(point).or_insert(0);
        }
        self.absorb(displaced)
    }

    fn take_contents(&mut self) -> TileContents {
        self.stock
            .iter_mut()
            .filter(|(_, held)| **held > 0)
            .map(|(point, held)| (*point, std::mem::take(held)))
            .collect()
    }

    fn absorb(&mut self, contents: TileContents) -> TileContents {
        let mut overflow = Vec::new();
        for (point, amount) in contents {
            let placed = self.deposit(amount, Some(point));
            if placed < amount {
                overflow.push((point, amount - placed));
            }
        }
        overflow
    }

    fn as_gold(&self) -> Option<&GoldControl> {
        Some(self)
    }

    fn as_gold_mut(&mut self) -> Option<&mut GoldControl> {
        Some(self)
    }
}

/// Counted slots: lair beds, prison cells, library shelves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotControl {
    function: RoomFunction,
    capacity_per_tile: i32,
    anchor: Option<Point>,
    tiles: usize,
    occupied: i32,
}

impl SlotControl {
    pub fn new(function: RoomFunction, capacity_per_tile: i32, tiles: &BTreeSet<Point>) -> Self {
        Self {
            function,
            capacity_per_tile: capacity_per_tile.max(0),
            anchor: tiles.iter().next().copied(),
            tiles: tiles.len(),
            occupied: 0,
        }
    }

    /// Claim up to `count` slots, returning how many were granted.
    fn occupy(&mut self, count: i32) -> i32 {
        let granted = count.max(0).min(self.free_capacity());
        self.occupied += granted;
        granted
    }
}

impl RoomObjectControl for SlotControl {
    fn function(&self) -> RoomFunction {
        self.function
    }

    fn current_capacity(&self) -> i32 {
        self.occupied
    }

    fn max_capacity(&self) -> i32 {
        self.capacity_per_tile * self.tiles as i32
    }

    fn retile(&mut self, tiles: &BTreeSet<Point>) -> TileContents {
        self.tiles = tiles.len();
        self.anchor = tiles.iter().next().copied();
        let excess = self.occupied - self.max_capacity();
        if excess > 0 {
            self.occupied -= excess;
            self.anchor.map(|point| vec![(point, excess)]).unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    fn take_contents(&mut self) -> TileContents {
        let occupied = std::mem::take(&mut self.occupied);
        match self.anchor {
            Some(point) if occupied > 0 => vec![(point, occupied)],
            _ => Vec::new(),
        }
    }

    fn absorb(&mut self, contents: TileContents) -> TileContents {
        let mut overflow = Vec::new();
        for (point, count) in contents {
            let granted = self.occupy(count);
            if granted < count {
                overflow.push((point, count - granted));
            }
        }
        overflow
    }
}

/// Build the controls a room instance needs for its tile set.
pub fn controls_for(room: &RoomDefinition, tiles: &BTreeSet<Point>) -> Vec<Box<dyn RoomObjectControl>> {
    room.storage
        .iter()
        .map(|spec| -> Box<dyn RoomObjectControl> {
            match spec.function {
                RoomFunction::Gold => Box::new(GoldControl::new(spec.capacity_per_tile, tiles)),
                function => Box::new(SlotControl::new(function, spec.capacity_per_tile, tiles)),
            }
        })
        .collect()
}
