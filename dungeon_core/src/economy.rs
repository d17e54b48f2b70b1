//! Per-player gold ledger.
//!
//! The ledger owns every player's account together with the storage controls
//! of every room instance, behind a single mutex. All mutation goes through
//! [`GoldLedger::transaction`] (or the one-shot wrappers built on it), so a
//! composed operation holds the lock exactly once and never observes a torn
//! account.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bevy::prelude::Resource;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    catalog::{RoomDefinition, RoomFunction, RoomId},
    events::GoldDrop,
    grid::Point,
    players::PlayerId,
    room_controls::{controls_for, GoldControl, RoomObjectControl, TileContents},
    topology::RoomInstanceId,
};

/// Gold position of one player.
///
/// `current_gold` always equals the gold stored in the player's vaults plus
/// `reserve`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlayerGoldAccount {
    pub current_gold: i32,
    pub max_gold_capacity: i32,
    pub reserve: i32,
}

/// Where a targeted deposit should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositTarget {
    pub room: RoomInstanceId,
    pub at: Point,
}

#[derive(Debug)]
struct RoomStorage {
    owner: PlayerId,
    room: RoomId,
    controls: Vec<Box<dyn RoomObjectControl>>,
}

impl RoomStorage {
    fn gold(&self) -> Option<&GoldControl> {
        self.controls.iter().find_map(|control| control.as_gold())
    }

    fn gold_mut(&mut self) -> Option<&mut GoldControl> {
        self.controls
            .iter_mut()
            .find_map(|control| control.as_gold_mut())
    }

    fn gold_capacity(&self) -> i32 {
        self.gold().map(GoldControl::capacity).unwrap_or(0)
    }

    fn gold_stored(&self) -> i32 {
        self.gold().map(GoldControl::stored).unwrap_or(0)
    }
}

/// Lock-protected ledger contents. Only reachable through a transaction.
#[derive(Debug, Default)]
pub struct LedgerState {
    accounts: BTreeMap<PlayerId, PlayerGoldAccount>,
    rooms: BTreeMap<RoomInstanceId, RoomStorage>,
}

impl LedgerState {
    fn account_mut(&mut self, player: PlayerId) -> &mut PlayerGoldAccount {
        self.accounts.entry(player).or_default()
    }

    pub fn account(&self, player: PlayerId) -> PlayerGoldAccount {
        self.accounts.get(&player).copied().unwrap_or_default()
    }

    pub fn accounts(&self) -> impl Iterator<Item = (PlayerId, PlayerGoldAccount)> + '_ {
        self.accounts.iter().map(|(player, account)| (*player, *account))
    }

    /// Gold-storing rooms of `player`, in instance id order.
    fn gold_rooms(&self, player: PlayerId) -> Vec<RoomInstanceId> {
        self.rooms
            .iter()
            .filter(|(_, storage)| storage.owner == player && storage.gold().is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Deposit gold for `player`, returning the part no vault could take.
    ///
    /// With a target naming one of the player's vaults only that vault is
    /// filled, starting at the target tile. Otherwise the amount is spread
    /// round-robin over every vault with free space.
    pub fn add_gold(&mut self, player: PlayerId, amount: i32, target: Option<DepositTarget>) -> i32 {
        if amount <= 0 {
            return 0;
        }

        let targeted = target.filter(|target| {
            self.rooms
                .get(&target.room)
                .is_some_and(|storage| storage.owner == player && storage.gold().is_some())
        });

        let mut remaining = amount;
        if let Some(target) = targeted {
            if let Some(vault) = self
                .rooms
                .get_mut(&target.room)
                .and_then(RoomStorage::gold_mut)
            {
                remaining -= vault.deposit(remaining, Some(target.at));
            }
        } else {
            let vaults = self.gold_rooms(player);
            loop {
                let open: Vec<RoomInstanceId> = vaults
                    .iter()
                    .copied()
                    .filter(|id| {
                        self.rooms
                            .get(id)
                            .and_then(RoomStorage::gold)
                            .is_some_and(|vault| vault.free_capacity() > 0)
                    })
                    .collect();
                if remaining == 0 || open.is_empty() {
                    break;
                }
                let share = ceil_div(remaining, open.len() as i32);
                for id in open {
                    if remaining == 0 {
                        break;
                    }
                    if let Some(vault) = self.rooms.get_mut(&id).and_then(RoomStorage::gold_mut) {
                        remaining -= vault.deposit(share.min(remaining), None);
                    }
                }
            }
        }

        let deposited = amount - remaining;
        let account = self.account_mut(player);
        account.current_gold = account.current_gold.saturating_add(deposited);
        tracing::debug!(
            target: "dungeon::economy",
            player = player.0,
            amount,
            deposited,
            remainder = remaining,
            "ledger.add"
        );
        remaining
    }

    /// Withdraw `amount` from `player`, returning the unsatisfied part.
    ///
    /// Vaults are drained evenly: each pass takes `ceil(remaining / active)`
    /// from every vault still holding gold, capped at its stock. The reserve
    /// is drawn down only once the vaults are empty.
    pub fn subtract_gold(&mut self, amount: i32, player: PlayerId) -> i32 {
        if amount <= 0 {
            return 0;
        }
        if self.account(player).current_gold <= 0 {
            return amount;
        }

        let mut remaining = amount;
        let mut active: Vec<RoomInstanceId> = self
            .gold_rooms(player)
            .into_iter()
            .filter(|id| self.rooms.get(id).is_some_and(|s| s.gold_stored() > 0))
            .collect();

        while remaining > 0 && !active.is_empty() {
            let share = ceil_div(remaining, active.len() as i32);
            for id in &active {
                if remaining == 0 {
                    break;
                }
                if let Some(vault) = self.rooms.get_mut(id).and_then(RoomStorage::gold_mut) {
                    remaining -= vault.withdraw(share.min(remaining));
                }
            }
            active.retain(|id| self.rooms.get(id).is_some_and(|s| s.gold_stored() > 0));
        }

        let account = self.account_mut(player);
        let from_reserve = account.reserve.min(remaining);
        account.reserve -= from_reserve;
        remaining -= from_reserve;
        account.current_gold -= amount - remaining;

        tracing::debug!(
            target: "dungeon::economy",
            player = player.0,
            amount,
            unsatisfied = remaining,
            "ledger.subtract"
        );
        remaining
    }

    /// Credit gold that is not tied to any vault, e.g. level starting funds.
    pub fn grant_gold(&mut self, player: PlayerId, amount: i32) {
        if amount <= 0 {
            return;
        }
        let account = self.account_mut(player);
        account.reserve = account.reserve.saturating_add(amount);
        account.current_gold = account.current_gold.saturating_add(amount);
    }

    pub fn adjust_capacity(&mut self, player: PlayerId, delta: i32) {
        let account = self.account_mut(player);
        account.max_gold_capacity += delta;
    }

    /// Create storage for a freshly detected or built instance.
    pub fn attach_room(
        &mut self,
        id: RoomInstanceId,
        owner: PlayerId,
        room: &RoomDefinition,
        tiles: &BTreeSet<Point>,
    ) {
        let storage = RoomStorage {
            owner,
            room: room.id,
            controls: controls_for(room, tiles),
        };
        let capacity = storage.gold_capacity();
        self.rooms.insert(id, storage);
        self.adjust_capacity(owner, capacity);
    }

    /// Tear down an instance's storage. Stored gold is deducted from the
    /// owner and handed back as drops on the tiles that held it.
    pub fn detach_room(&mut self, id: RoomInstanceId) -> Vec<GoldDrop> {
        let Some(mut storage) = self.rooms.remove(&id) else {
            return Vec::new();
        };
        let capacity = storage.gold_capacity();
        let mut drops = Vec::new();
        for control in storage.controls.iter_mut() {
            let contents = control.take_contents();
            if control.function() == RoomFunction::Gold {
                drops.extend(contents.into_iter().map(|(at, amount)| GoldDrop { at, amount }));
            }
        }
        let released: i32 = drops.iter().map(|drop| drop.amount).sum();
        let account = self.account_mut(storage.owner);
        account.max_gold_capacity -= capacity;
        account.current_gold -= released;
        drops
    }

    /// Fold `absorbed` instances into `target`, which ends up covering `tiles`.
    ///
    /// Capacity of every participant is withdrawn first, contents move while
    /// the tile set changes, and the merged capacity is added back once.
    pub fn merge_rooms(
        &mut self,
        target: RoomInstanceId,
        absorbed: &[RoomInstanceId],
        tiles: &BTreeSet<Point>,
    ) -> Vec<GoldDrop> {
        let Some(owner) = self.rooms.get(&target).map(|storage| storage.owner) else {
            return Vec::new();
        };

        let mut withdrawn = 0;
        for id in std::iter::once(&target).chain(absorbed) {
            if let Some(storage) = self.rooms.get(id) {
                withdrawn += storage.gold_capacity();
            }
        }
        self.adjust_capacity(owner, -withdrawn);

        let mut lifted: BTreeMap<RoomFunction, TileContents> = BTreeMap::new();
        let mut moved_gold = 0;
        for id in absorbed {
            if let Some(mut storage) = self.rooms.remove(id) {
                moved_gold += storage.gold_stored();
                for control in storage.controls.iter_mut() {
                    lifted
                        .entry(control.function())
                        .or_default()
                        .extend(control.take_contents());
                }
                if storage.owner != owner {
                    let previous = self.account_mut(storage.owner);
                    previous.current_gold -= moved_gold;
                    self.account_mut(owner).current_gold += moved_gold;
                }
                moved_gold = 0;
            }
        }

        let mut drops = Vec::new();
        if let Some(storage) = self.rooms.get_mut(&target) {
            for control in storage.controls.iter_mut() {
                let mut overflow = control.retile(tiles);
                if let Some(contents) = lifted.remove(&control.function()) {
                    overflow.extend(control.absorb(contents));
                }
                if control.function() == RoomFunction::Gold {
                    drops.extend(overflow.into_iter().map(|(at, amount)| GoldDrop { at, amount }));
                }
            }
        }

        let merged = self
            .rooms
            .get(&target)
            .map(RoomStorage::gold_capacity)
            .unwrap_or(0);
        let released: i32 = drops.iter().map(|drop| drop.amount).sum();
        let account = self.account_mut(owner);
        account.max_gold_capacity += merged;
        account.current_gold -= released;
        drops
    }

    /// Hand an instance, its stored gold and its capacity to a new owner.
    pub fn transfer_room(&mut self, id: RoomInstanceId, new_owner: PlayerId) {
        let Some(storage) = self.rooms.get_mut(&id) else {
            return;
        };
        let previous = std::mem::replace(&mut storage.owner, new_owner);
        let stored = storage.gold_stored();
        let capacity = storage.gold_capacity();
        if previous == new_owner {
            return;
        }
        let old = self.account_mut(previous);
        old.current_gold -= stored;
        old.max_gold_capacity -= capacity;
        let new = self.account_mut(new_owner);
        new.current_gold += stored;
        new.max_gold_capacity += capacity;
        tracing::debug!(
            target: "dungeon::economy",
            room = id.0,
            from = previous.0,
            to = new_owner.0,
            stored,
            capacity,
            "ledger.transfer_room"
        );
    }

    pub fn room_owner(&self, id: RoomInstanceId) -> Option<PlayerId> {
        self.rooms.get(&id).map(|storage| storage.owner)
    }

    pub fn room_type(&self, id: RoomInstanceId) -> Option<RoomId> {
        self.rooms.get(&id).map(|storage| storage.room)
    }

    /// Gold stored in one instance; `None` when it has no vault.
    pub fn room_stock(&self, id: RoomInstanceId) -> Option<i32> {
        self.rooms.get(&id).and_then(RoomStorage::gold).map(GoldControl::stored)
    }

    pub fn room_gold_capacity(&self, id: RoomInstanceId) -> i32 {
        self.rooms
            .get(&id)
            .map(RoomStorage::gold_capacity)
            .unwrap_or(0)
    }

    /// Gold stored on one tile of an instance.
    pub fn tile_stock(&self, id: RoomInstanceId, at: Point) -> Option<i32> {
        self.rooms
            .get(&id)
            .and_then(RoomStorage::gold)
            .and_then(|vault| vault.stock_at(at))
    }

    pub fn control(&self, id: RoomInstanceId, function: RoomFunction) -> Option<&dyn RoomObjectControl> {
        self.rooms.get(&id).and_then(|storage| {
            storage
                .controls
                .iter()
                .find(|control| control.function() == function)
                .map(|control| &**control)
        })
    }

    pub fn rooms(&self) -> impl Iterator<Item = RoomInstanceId> + '_ {
        self.rooms.keys().copied()
    }

    /// Capacity the account should report, summed from the vaults.
    pub fn expected_capacity(&self, player: PlayerId) -> i32 {
        self.rooms
            .values()
            .filter(|storage| storage.owner == player)
            .map(RoomStorage::gold_capacity)
            .sum()
    }

    /// Gold the account should report, summed from the vaults plus reserve.
    pub fn expected_gold(&self, player: PlayerId) -> i32 {
        let stored: i32 = self
            .rooms
            .values()
            .filter(|storage| storage.owner == player)
            .map(RoomStorage::gold_stored)
            .sum();
        stored + self.account(player).reserve
    }
}

fn ceil_div(numerator: i32, denominator: i32) -> i32 {
    numerator / denominator + i32::from(numerator % denominator != 0)
}

/// Shared handle to the ledger. Clones refer to the same accounts.
#[derive(Resource, Debug, Clone, Default)]
pub struct GoldLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl GoldLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the ledger.
    ///
    /// Everything inside the closure is one atomic step for other threads;
    /// calling back into the `GoldLedger` from inside it deadlocks, use the
    /// `LedgerState` methods instead.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.inner.lock();
        f(&mut state)
    }

    pub fn add_gold(&self, player: PlayerId, amount: i32, target: Option<DepositTarget>) -> i32 {
        self.transaction(|ledger| ledger.add_gold(player, amount, target))
    }

    pub fn subtract_gold(&self, amount: i32, player: PlayerId) -> i32 {
        self.transaction(|ledger| ledger.subtract_gold(amount, player))
    }

    pub fn grant_gold(&self, player: PlayerId, amount: i32) {
        self.transaction(|ledger| ledger.grant_gold(player, amount))
    }

    pub fn adjust_capacity(&self, player: PlayerId, delta: i32) {
        self.transaction(|ledger| ledger.adjust_capacity(player, delta))
    }

    pub fn account(&self, player: PlayerId) -> PlayerGoldAccount {
        self.transaction(|ledger| ledger.account(player))
    }

    pub fn room_stock(&self, id: RoomInstanceId) -> Option<i32> {
        self.transaction(|ledger| ledger.room_stock(id))
    }

    /// Withdraw `amount` only if the player can cover all of it.
    pub fn try_spend(&self, player: PlayerId, amount: i32) -> Result<(), i32> {
        self.transaction(|ledger| {
            let available = ledger.account(player).current_gold;
            if available < amount {
                return Err(available);
            }
            ledger.subtract_gold(amount, player);
            Ok(())
        })
    }
}
