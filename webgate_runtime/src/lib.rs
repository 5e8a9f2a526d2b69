//! Shared runtime utilities for the webgate gateway.
//!
//! Holds the console command grammar and the envelope types exchanged across
//! the command bridge, without depending on the host runtime in `webgate_core`.

pub mod command_text;
mod envelope;

pub use command_text::{
    parse_admin_command, parse_console_line, parse_days, parse_ip, AdminCommand,
    CommandParseError, ConsoleLine, MAX_GRANT_DAYS,
};
pub use envelope::{AuditCategory, CommandResult};
