//! Console command parsing

use std::num::ParseIntError;

use thiserror::Error;

use cp_core::types::MachineId;

/// One operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `l`: list machines and tunnels
    List,
    /// `c <id> <port>`: open a tunnel
    Connect { id: MachineId, port: u16 },
    /// `d <id>`: close a tunnel
    Disconnect { id: MachineId },
    /// `p`: print proxy client configs
    Proxies,
    /// `h`: help
    Help,
    /// `q`: tear down and exit
    Quit,
}

/// A numeric argument that failed to parse
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {what} {value:?}: {source}")]
pub struct CommandError {
    what: &'static str,
    value: String,
    #[source]
    source: ParseIntError,
}

fn number<T>(what: &'static str, value: &str) -> Result<T, CommandError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    value.parse().map_err(|source| CommandError {
        what,
        value: value.to_string(),
        source,
    })
}

/// Parse one input line
///
/// Returns `Ok(None)` for blank lines, unknown commands and wrong argument
/// counts; those are ignored by the console. Non-numeric ids or ports are
/// reported as errors.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return Ok(None);
    };

    let command = match (first.to_lowercase().as_str(), &tokens[1..]) {
        ("l", []) => Command::List,
        ("h", []) => Command::Help,
        ("p", []) => Command::Proxies,
        ("q", []) => Command::Quit,
        ("c", [id, port]) => Command::Connect {
            id: MachineId(number("id", id)?),
            port: number("port", port)?,
        },
        ("d", [id]) => Command::Disconnect {
            id: MachineId(number("id", id)?),
        },
        _ => return Ok(None),
    };

    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("l").unwrap(), Some(Command::List));
        assert_eq!(parse_command("H").unwrap(), Some(Command::Help));
        assert_eq!(parse_command("  q \r").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("p").unwrap(), Some(Command::Proxies));
    }

    #[test]
    fn test_connect() {
        assert_eq!(
            parse_command("C 2 1080").unwrap(),
            Some(Command::Connect {
                id: MachineId(2),
                port: 1080
            })
        );
    }

    #[test]
    fn test_disconnect() {
        assert_eq!(
            parse_command("d 0").unwrap(),
            Some(Command::Disconnect { id: MachineId(0) })
        );
    }

    #[test]
    fn test_ignored_lines() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("x").unwrap(), None);
        assert_eq!(parse_command("c 1").unwrap(), None);
        assert_eq!(parse_command("d").unwrap(), None);
        assert_eq!(parse_command("d 1 2").unwrap(), None);
        assert_eq!(parse_command("l extra").unwrap(), None);
    }

    #[test]
    fn test_malformed_numbers() {
        let err = parse_command("c one 1080").unwrap_err();
        assert!(err.to_string().contains("invalid id \"one\""));

        let err = parse_command("c 1 socks").unwrap_err();
        assert!(err.to_string().contains("invalid port"));

        // Out of range for a port
        assert!(parse_command("c 1 70000").is_err());
        assert!(parse_command("d -1").is_err());
    }
}
