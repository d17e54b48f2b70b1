use std::fmt;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

/// Identifier for a keeper (or the neutral owner) on the map.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u16);

impl PlayerId {
    /// Owner of unclaimed tiles and rooms.
    pub const NEUTRAL: PlayerId = PlayerId(0);

    pub fn is_neutral(self) -> bool {
        self == Self::NEUTRAL
    }

    /// True when `other` is a real keeper different from `self`.
    pub fn is_hostile_to(self, other: PlayerId) -> bool {
        !self.is_neutral() && !other.is_neutral() && self != other
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PlayerId {
    fn from(value: u16) -> Self {
        PlayerId(value)
    }
}

/// Keepers known to the simulation, in registration order.
#[derive(Resource, Debug, Clone)]
pub struct PlayerRegistry {
    pub players: Vec<PlayerId>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self {
            players: vec![PlayerId(1), PlayerId(2)],
        }
    }
}

impl PlayerRegistry {
    pub fn new(players: Vec<PlayerId>) -> Self {
        Self { players }
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }

    pub fn register(&mut self, player: PlayerId) -> bool {
        if player.is_neutral() || self.contains(player) {
            return false;
        }
        self.players.push(player);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostility_ignores_neutral() {
        assert!(PlayerId(1).is_hostile_to(PlayerId(2)));
        assert!(!PlayerId(1).is_hostile_to(PlayerId(1)));
        assert!(!PlayerId(1).is_hostile_to(PlayerId::NEUTRAL));
        assert!(!PlayerId::NEUTRAL.is_hostile_to(PlayerId(1)));
    }

    #[test]
    fn registry_rejects_duplicates_and_neutral() {
        let mut registry = PlayerRegistry::new(vec![PlayerId(1)]);
        assert!(registry.register(PlayerId(3)));
        assert!(!registry.register(PlayerId(3)));
        assert!(!registry.register(PlayerId::NEUTRAL));
        assert_eq!(registry.players, vec![PlayerId(1), PlayerId(3)]);
    }
}
