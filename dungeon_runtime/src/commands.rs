use serde::{Deserialize, Serialize};

/// Grid coordinate as carried on the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
}

impl GridPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Supported command payloads.
///
/// Player ids are raw keeper ids; room types are referenced by catalog name so
/// command producers never need the catalog itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandPayload {
    Tick {
        steps: u32,
    },
    Build {
        start: GridPoint,
        end: GridPoint,
        player: u16,
        room: String,
    },
    Sell {
        start: GridPoint,
        end: GridPoint,
        player: u16,
    },
    AddGold {
        player: u16,
        amount: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at: Option<GridPoint>,
    },
    SubtractGold {
        player: u16,
        amount: i32,
    },
    DamageTile {
        at: GridPoint,
        player: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creature: Option<String>,
    },
    HealTile {
        at: GridPoint,
        player: u16,
    },
    ClaimTile {
        at: GridPoint,
        player: u16,
    },
    Select {
        start: GridPoint,
        end: GridPoint,
        player: u16,
        selected: bool,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<u16>,
    },
}

impl CommandPayload {
    /// Short verb used for log fields.
    pub fn verb(&self) -> &'static str {
        match self {
            CommandPayload::Tick { .. } => "tick",
            CommandPayload::Build { .. } => "build",
            CommandPayload::Sell { .. } => "sell",
            CommandPayload::AddGold { .. } => "add_gold",
            CommandPayload::SubtractGold { .. } => "subtract_gold",
            CommandPayload::DamageTile { .. } => "damage_tile",
            CommandPayload::HealTile { .. } => "heal_tile",
            CommandPayload::ClaimTile { .. } => "claim_tile",
            CommandPayload::Select { .. } => "select",
            CommandPayload::Status { .. } => "status",
        }
    }

    /// Whether the command mutates gold or room capacity.
    pub fn touches_economy(&self) -> bool {
        matches!(
            self,
            CommandPayload::Build { .. }
                | CommandPayload::Sell { .. }
                | CommandPayload::AddGold { .. }
                | CommandPayload::SubtractGold { .. }
                | CommandPayload::DamageTile { .. }
                | CommandPayload::ClaimTile { .. }
        )
    }
}
