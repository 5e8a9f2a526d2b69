use std::net::{AddrParseError, IpAddr};
use std::num::ParseIntError;

use thiserror::Error;

/// Longest grant accepted from any surface (roughly a century).
pub const MAX_GRANT_DAYS: u32 = 36_500;

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("days must be between 1 and {max}, got {value}")]
    DaysOutOfRange { value: u32, max: u32 },
    #[error("invalid ip address '{value}': {source}")]
    InvalidAddress {
        value: String,
        source: AddrParseError,
    },
}

/// A single console input split into its verb and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub verb: String,
    pub args: Vec<String>,
}

impl ConsoleLine {
    pub fn arg_refs(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }
}

/// Sub-commands of the `webmanager` console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Add { ip: IpAddr, days: u32 },
    Remove { ip: IpAddr },
    List,
    Reload,
}

/// Split a console line into a lower-cased verb and its arguments.
///
/// A leading `/` is accepted and ignored so lines typed in chat style work the
/// same as bare console input.
pub fn parse_console_line(input: &str) -> Result<ConsoleLine, CommandParseError> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(CommandParseError::Empty)?;
    let args = parts.map(str::to_string).collect();
    Ok(ConsoleLine { verb, args })
}

/// Parse the arguments that follow `webmanager`.
pub fn parse_admin_command(args: &[&str]) -> Result<AdminCommand, CommandParseError> {
    let mut parts = args.iter().copied();
    let Some(sub) = parts.next() else {
        return Ok(AdminCommand::Help);
    };

    let command = match sub.to_ascii_lowercase().as_str() {
        "add" => {
            let ip_str = parts.next().ok_or(CommandParseError::MissingArgument("ip"))?;
            let days_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("days"))?;
            let ip = parse_ip(ip_str)?;
            let days = parse_days(days_str)?;
            AdminCommand::Add { ip, days }
        }
        "remove" => {
            let ip_str = parts.next().ok_or(CommandParseError::MissingArgument("ip"))?;
            AdminCommand::Remove {
                ip: parse_ip(ip_str)?,
            }
        }
        "list" => AdminCommand::List,
        "reload" => AdminCommand::Reload,
        other => return Err(CommandParseError::UnknownCommand(other.to_string())),
    };

    if let Some(extra) = parts.next() {
        return Err(CommandParseError::UnexpectedArgument(extra.to_string()));
    }
    Ok(command)
}

pub fn parse_ip(value: &str) -> Result<IpAddr, CommandParseError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|source| CommandParseError::InvalidAddress {
            value: value.to_string(),
            source,
        })
}

/// Parse a grant length in days; zero and values above [`MAX_GRANT_DAYS`] are rejected.
pub fn parse_days(value: &str) -> Result<u32, CommandParseError> {
    let days = value
        .trim()
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context: "days",
            source,
        })?;
    if days == 0 || days > MAX_GRANT_DAYS {
        return Err(CommandParseError::DaysOutOfRange {
            value: days,
            max: MAX_GRANT_DAYS,
        });
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_line_lowercases_verb_and_keeps_args() {
        let line = parse_console_line("  /SAY Hello World ").unwrap();
        assert_eq!(line.verb, "say");
        assert_eq!(line.args, vec!["Hello", "World"]);
    }

    #[test]
    fn blank_console_line_is_empty() {
        assert!(matches!(
            parse_console_line("   "),
            Err(CommandParseError::Empty)
        ));
        assert!(matches!(parse_console_line("/"), Err(CommandParseError::Empty)));
    }

    #[test]
    fn admin_without_args_is_help() {
        assert_eq!(parse_admin_command(&[]).unwrap(), AdminCommand::Help);
    }

    #[test]
    fn admin_add_parses_ip_and_days() {
        let cmd = parse_admin_command(&["add", "198.51.100.2", "3"]).unwrap();
        assert_eq!(
            cmd,
            AdminCommand::Add {
                ip: "198.51.100.2".parse().unwrap(),
                days: 3
            }
        );
    }

    #[test]
    fn admin_add_rejects_zero_days() {
        let err = parse_admin_command(&["add", "10.0.0.1", "0"]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"days must be between 1 and 36500, got 0");
    }

    #[test]
    fn admin_add_rejects_non_numeric_days() {
        let err = parse_admin_command(&["add", "10.0.0.1", "soon"]).unwrap_err();
        assert!(matches!(
            err,
            CommandParseError::InvalidInteger {
                context: "days",
                ..
            }
        ));
    }

    #[test]
    fn admin_add_requires_both_arguments() {
        let err = parse_admin_command(&["add", "10.0.0.1"]).unwrap_err();
        assert!(matches!(err, CommandParseError::MissingArgument("days")));
    }

    #[test]
    fn admin_remove_rejects_trailing_arguments() {
        let err = parse_admin_command(&["remove", "10.0.0.1", "now"]).unwrap_err();
        assert!(matches!(err, CommandParseError::UnexpectedArgument(ref v) if v == "now"));
    }

    #[test]
    fn admin_rejects_bad_address() {
        let err = parse_admin_command(&["remove", "not-an-ip"]).unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidAddress { .. }));
    }

    #[test]
    fn admin_sub_commands_are_case_insensitive() {
        assert_eq!(parse_admin_command(&["LIST"]).unwrap(), AdminCommand::List);
        assert_eq!(
            parse_admin_command(&["Reload"]).unwrap(),
            AdminCommand::Reload
        );
    }

    #[test]
    fn unknown_admin_sub_command() {
        let err = parse_admin_command(&["grant"]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"unknown command: grant");
    }

    #[test]
    fn ipv6_addresses_are_accepted() {
        let ip = parse_ip("::1").unwrap();
        assert!(ip.is_ipv6());
    }
}
