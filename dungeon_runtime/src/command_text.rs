use std::num::ParseIntError;

use thiserror::Error;

use crate::{CommandPayload, GridPoint};

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("invalid boolean '{0}'")]
    InvalidBool(String),
    #[error("invalid json command: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Parse one line of operator input.
///
/// Lines starting with `{` are decoded as tagged JSON payloads; anything else
/// uses the whitespace separated verb syntax, e.g. `build 1 1 2 2 3 treasury`.
pub fn parse_command_line(input: &str) -> Result<CommandPayload, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(CommandParseError::Empty)?;

    match verb.as_str() {
        "tick" | "turn" => {
            let steps_str = parts.next().unwrap_or("1");
            let steps = parse_u32(steps_str, "tick steps")?;
            Ok(CommandPayload::Tick { steps })
        }
        "build" => {
            let start = parse_point(&mut parts, "build start")?;
            let end = parse_point(&mut parts, "build end")?;
            let player = parse_player(&mut parts)?;
            let room = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("room"))?
                .to_ascii_lowercase();
            Ok(CommandPayload::Build {
                start,
                end,
                player,
                room,
            })
        }
        "sell" => {
            let start = parse_point(&mut parts, "sell start")?;
            let end = parse_point(&mut parts, "sell end")?;
            let player = parse_player(&mut parts)?;
            Ok(CommandPayload::Sell { start, end, player })
        }
        "gold" | "add_gold" => {
            let player = parse_player(&mut parts)?;
            let amount_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("amount"))?;
            let amount = parse_i32(amount_str, "gold amount")?;
            let at = match parts.next() {
                Some(x_str) => {
                    let x = parse_i32(x_str, "gold x")?;
                    let y_str = parts.next().ok_or(CommandParseError::MissingArgument("y"))?;
                    let y = parse_i32(y_str, "gold y")?;
                    Some(GridPoint::new(x, y))
                }
                None => None,
            };
            Ok(CommandPayload::AddGold { player, amount, at })
        }
        "spend" | "subtract_gold" => {
            let player = parse_player(&mut parts)?;
            let amount_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("amount"))?;
            let amount = parse_i32(amount_str, "spend amount")?;
            Ok(CommandPayload::SubtractGold { player, amount })
        }
        "dig" | "damage" => {
            let at = parse_point(&mut parts, "dig target")?;
            let player = parse_player(&mut parts)?;
            let creature = parts.next().map(|c| c.to_ascii_lowercase());
            Ok(CommandPayload::DamageTile {
                at,
                player,
                creature,
            })
        }
        "heal" | "repair" => {
            let at = parse_point(&mut parts, "heal target")?;
            let player = parse_player(&mut parts)?;
            Ok(CommandPayload::HealTile { at, player })
        }
        "claim" => {
            let at = parse_point(&mut parts, "claim target")?;
            let player = parse_player(&mut parts)?;
            Ok(CommandPayload::ClaimTile { at, player })
        }
        "select" | "tag" => {
            let start = parse_point(&mut parts, "select start")?;
            let end = parse_point(&mut parts, "select end")?;
            let player = parse_player(&mut parts)?;
            let selected = match parts.next().map(|v| v.to_ascii_lowercase()) {
                None => true,
                Some(token) => match token.as_str() {
                    "on" | "true" | "1" => true,
                    "off" | "false" | "0" => false,
                    _ => return Err(CommandParseError::InvalidBool(token)),
                },
            };
            Ok(CommandPayload::Select {
                start,
                end,
                player,
                selected,
            })
        }
        "status" => {
            let player = match parts.next() {
                Some(value) => Some(parse_u16(value, "status player")?),
                None => None,
            };
            Ok(CommandPayload::Status { player })
        }
        other => Err(CommandParseError::UnknownCommand(other.to_string())),
    }
}

fn parse_point<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    context: &'static str,
) -> Result<GridPoint, CommandParseError> {
    let x_str = parts.next().ok_or(CommandParseError::MissingArgument("x"))?;
    let y_str = parts.next().ok_or(CommandParseError::MissingArgument("y"))?;
    Ok(GridPoint::new(
        parse_i32(x_str, context)?,
        parse_i32(y_str, context)?,
    ))
}

fn parse_player<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<u16, CommandParseError> {
    let value = parts
        .next()
        .ok_or(CommandParseError::MissingArgument("player"))?;
    parse_u16(value, "player id")
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_u16(value: &str, context: &'static str) -> Result<u16, CommandParseError> {
    value
        .parse::<u16>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_i32(value: &str, context: &'static str) -> Result<i32, CommandParseError> {
    value
        .parse::<i32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_rectangle() {
        let payload = parse_command_line("build 1 1 2 2 3 Treasury").unwrap();
        assert_eq!(
            payload,
            CommandPayload::Build {
                start: GridPoint::new(1, 1),
                end: GridPoint::new(2, 2),
                player: 3,
                room: "treasury".to_string(),
            }
        );
    }

    #[test]
    fn gold_point_is_optional() {
        assert_eq!(
            parse_command_line("gold 3 500").unwrap(),
            CommandPayload::AddGold {
                player: 3,
                amount: 500,
                at: None
            }
        );
        assert_eq!(
            parse_command_line("gold 3 500 4 5").unwrap(),
            CommandPayload::AddGold {
                player: 3,
                amount: 500,
                at: Some(GridPoint::new(4, 5))
            }
        );
    }

    #[test]
    fn dig_with_creature() {
        assert_eq!(
            parse_command_line("dig 2 3 4 Imp").unwrap(),
            CommandPayload::DamageTile {
                at: GridPoint::new(2, 3),
                player: 4,
                creature: Some("imp".to_string()),
            }
        );
    }

    #[test]
    fn json_lines_are_accepted() {
        let payload =
            parse_command_line(r#"{"command":"claim","at":{"x":1,"y":2},"player":3}"#);
        assert!(matches!(payload, Err(CommandParseError::InvalidJson(_))));

        let payload =
            parse_command_line(r#"{"command":"claim_tile","at":{"x":1,"y":2},"player":3}"#)
                .unwrap();
        assert_eq!(
            payload,
            CommandPayload::ClaimTile {
                at: GridPoint::new(1, 2),
                player: 3
            }
        );
    }

    #[test]
    fn errors_are_descriptive() {
        assert!(matches!(parse_command_line("   "), Err(CommandParseError::Empty)));
        assert!(matches!(
            parse_command_line("sell 1 1 2"),
            Err(CommandParseError::MissingArgument("y"))
        ));
        assert!(matches!(
            parse_command_line("spend x 10"),
            Err(CommandParseError::InvalidInteger { .. })
        ));
        assert!(matches!(
            parse_command_line("select 0 0 1 1 3 maybe"),
            Err(CommandParseError::InvalidBool(_))
        ));
        assert!(matches!(
            parse_command_line("explode"),
            Err(CommandParseError::UnknownCommand(_))
        ));
    }
}
