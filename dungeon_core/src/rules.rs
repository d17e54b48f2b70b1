use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_GAME_RULES: &str = include_str!("data/game_rules.json");

/// Base damage dealt per hit, keyed by what is being hit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DamageRules {
    pub own_wall: i32,
    pub enemy_wall: i32,
    pub rock: i32,
    pub enemy_floor: i32,
    pub gem: i32,
}

impl Default for DamageRules {
    fn default() -> Self {
        Self {
            own_wall: 20,
            enemy_wall: 12,
            rock: 25,
            enemy_floor: 15,
            gem: 20,
        }
    }
}

/// Health restored per repair/claim action.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealRules {
    pub repair_wall: i32,
    pub claim_floor: i32,
    pub repair_floor: i32,
    pub reinforce_wall: i32,
}

impl Default for HealRules {
    fn default() -> Self {
        Self {
            repair_wall: 25,
            claim_floor: 15,
            repair_floor: 20,
            reinforce_wall: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameRules {
    pub damage: DamageRules,
    pub heal: HealRules,
    pub worker_creature: String,
    pub worker_dig_multiplier: f32,
    pub sell_percentage: i32,
    pub loose_gold_absorb_seconds: f32,
    pub tick_seconds: f32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            damage: DamageRules::default(),
            heal: HealRules::default(),
            worker_creature: "imp".to_string(),
            worker_dig_multiplier: 2.0,
            sell_percentage: 50,
            loose_gold_absorb_seconds: 1.0,
            tick_seconds: 0.1,
        }
    }
}

impl GameRules {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_GAME_RULES).expect("builtin game rules should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, GameRulesError> {
        let rules: GameRules = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn from_file(path: &Path) -> Result<Self, GameRulesError> {
        let contents = fs::read_to_string(path).map_err(|source| GameRulesError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Scale base damage for the acting creature; only the worker digs faster.
    pub fn scaled_damage(&self, base: i32, creature: Option<&str>) -> i32 {
        match creature {
            Some(name) if name.eq_ignore_ascii_case(&self.worker_creature) => {
                (base as f32 * self.worker_dig_multiplier).round() as i32
            }
            _ => base,
        }
    }

    /// Whole ticks between loose gold sweeps, never less than one.
    pub fn absorb_period_ticks(&self) -> u32 {
        ((self.loose_gold_absorb_seconds / self.tick_seconds).round() as u32).max(1)
    }

    /// Gold returned when selling `cost` worth of room tiles.
    pub fn sell_refund(&self, cost: i32) -> i32 {
        cost * self.sell_percentage / 100
    }

    fn validate(&self) -> Result<(), GameRulesError> {
        if !(0..=100).contains(&self.sell_percentage) {
            return Err(GameRulesError::Invalid(format!(
                "sell_percentage {} outside 0..=100",
                self.sell_percentage
            )));
        }
        if self.tick_seconds <= 0.0 || self.loose_gold_absorb_seconds <= 0.0 {
            return Err(GameRulesError::Invalid(
                "tick_seconds and loose_gold_absorb_seconds must be positive".to_string(),
            ));
        }
        if self.worker_dig_multiplier < 0.0 {
            return Err(GameRulesError::Invalid(
                "worker_dig_multiplier must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum GameRulesError {
    #[error("failed to parse game rules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read game rules from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid game rules: {0}")]
    Invalid(String),
}

#[derive(Resource, Debug, Clone)]
pub struct GameRulesHandle(pub Arc<GameRules>);

impl GameRulesHandle {
    pub fn new(rules: Arc<GameRules>) -> Self {
        Self(rules)
    }

    pub fn get(&self) -> Arc<GameRules> {
        Arc::clone(&self.0)
    }

    pub fn rules(&self) -> &GameRules {
        &self.0
    }

    pub fn replace(&mut self, rules: Arc<GameRules>) {
        self.0 = rules;
    }
}

/// Load rules from `DUNGEON_RULES_PATH`, then the crate's data file, then the
/// compiled-in copy.
pub fn load_game_rules_from_env() -> Arc<GameRules> {
    let override_path = env::var("DUNGEON_RULES_PATH").ok().map(PathBuf::from);
    let default_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/game_rules.json");
    let path = override_path.unwrap_or(default_path);

    match GameRules::from_file(&path) {
        Ok(rules) => {
            tracing::info!(
                target: "dungeon::config",
                path = %path.display(),
                "game_rules.loaded=file"
            );
            Arc::new(rules)
        }
        Err(err) => {
            tracing::warn!(
                target: "dungeon::config",
                path = %path.display(),
                error = %err,
                "game_rules.load_failed"
            );
            tracing::info!(target: "dungeon::config", "game_rules.loaded=builtin");
            GameRules::builtin()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_parse() {
        let rules = GameRules::builtin();
        assert_eq!(rules.worker_creature, "imp");
        assert_eq!(rules.damage.rock, 25);
        assert_eq!(rules.sell_percentage, 50);
    }

    #[test]
    fn worker_multiplier_applies_only_to_worker() {
        let rules = GameRules::default();
        assert_eq!(rules.scaled_damage(25, Some("imp")), 50);
        assert_eq!(rules.scaled_damage(25, Some("IMP")), 50);
        assert_eq!(rules.scaled_damage(25, Some("troll")), 25);
        assert_eq!(rules.scaled_damage(25, None), 25);
    }

    #[test]
    fn refund_uses_percentage() {
        let rules = GameRules::default();
        assert_eq!(rules.sell_refund(100), 50);
        assert_eq!(rules.sell_refund(15), 7);
    }

    #[test]
    fn absorb_period_counts_ticks() {
        let rules = GameRules::default();
        assert_eq!(rules.absorb_period_ticks(), 10);
        let fast = GameRules {
            loose_gold_absorb_seconds: 0.01,
            ..GameRules::default()
        };
        assert_eq!(fast.absorb_period_ticks(), 1);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let rules = GameRules::from_json_str(r#"{ "sell_percentage": 75 }"#).unwrap();
        assert_eq!(rules.sell_percentage, 75);
        assert_eq!(rules.damage.enemy_wall, 12);
    }

    #[test]
    fn invalid_percentage_is_rejected() {
        assert!(matches!(
            GameRules::from_json_str(r#"{ "sell_percentage": 150 }"#),
            Err(GameRulesError::Invalid(_))
        ));
    }
}
