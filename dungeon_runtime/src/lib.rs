//! Shared runtime contracts for the dungeon simulation.
//!
//! Holds the command surface (payload types and the text/JSON parsers) without
//! depending on the Bevy runtime in `dungeon_core`, so listeners and tools can
//! produce commands on any thread.

pub mod command_text;
pub mod commands;

pub use command_text::{parse_command_line, CommandParseError};
pub use commands::{CommandPayload, GridPoint};
