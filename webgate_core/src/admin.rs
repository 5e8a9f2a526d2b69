use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bevy_ecs::world::World;
use webgate_runtime::{parse_admin_command, AdminCommand, AuditCategory};

use crate::audit::AuditLog;
use crate::auth_store::{AuthorizationEntry, AuthorizationStore};
use crate::console::{CommandSender, ConsoleCommand, ConsoleError};

pub const ADMIN_PERMISSION: &str = "webmanager.admin";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

const HELP_LINES: &[&str] = &[
    "webmanager add <ip> <days> - authorize an address",
    "webmanager remove <ip> - revoke an address",
    "webmanager list - show authorized addresses",
    "webmanager reload - re-read the authorization file",
];

pub fn days(count: u32) -> Duration {
    DAY * count
}

/// Format an epoch-millis instant as local `YYYY-MM-DD HH:MM:SS`.
pub fn format_expiry(epoch_ms: u64) -> String {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| epoch_ms.to_string())
}

pub fn grant_message(ip: IpAddr, days: u32) -> String {
    format!("authorized {ip} for {days} day(s)")
}

pub fn revoke_message(ip: IpAddr) -> String {
    format!("removed authorization for {ip}")
}

fn list_lines(entries: &[AuthorizationEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["no authorized addresses".to_string()];
    }
    let mut lines = vec![format!("authorized addresses ({}):", entries.len())];
    lines.extend(
        entries
            .iter()
            .map(|e| format!("- {} (expires {})", e.ip, format_expiry(e.expires_at_ms))),
    );
    lines
}

/// The `webmanager` console command.
pub struct WebManagerCommand {
    store: Arc<AuthorizationStore>,
    audit: Arc<AuditLog>,
}

impl WebManagerCommand {
    pub fn new(store: Arc<AuthorizationStore>, audit: Arc<AuditLog>) -> Self {
        Self { store, audit }
    }
}

impl ConsoleCommand for WebManagerCommand {
    fn label(&self) -> &'static str {
        "webmanager"
    }

    fn usage(&self) -> &'static str {
        "webmanager <add|remove|list|reload>"
    }

    fn permission(&self) -> Option<&'static str> {
        Some(ADMIN_PERMISSION)
    }

    fn execute(
        &self,
        _world: &mut World,
        sender: &dyn CommandSender,
        args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        let lines = match parse_admin_command(args)? {
            AdminCommand::Help => HELP_LINES.iter().map(|l| l.to_string()).collect(),
            AdminCommand::Add { ip, days: count } => {
                self.store.authorize(&ip.to_string(), days(count));
                self.audit.record(
                    sender.name(),
                    AuditCategory::AuthorizationChange,
                    &format!("add {ip} for {count} day(s)"),
                );
                vec![grant_message(ip, count)]
            }
            AdminCommand::Remove { ip } => {
                self.store.revoke(&ip.to_string());
                self.audit.record(
                    sender.name(),
                    AuditCategory::AuthorizationChange,
                    &format!("remove {ip}"),
                );
                vec![revoke_message(ip)]
            }
            AdminCommand::List => list_lines(&self.store.list_authorized()),
            AdminCommand::Reload => {
                let count = self.store.reload();
                vec![format!("reloaded {count} authorization(s) from disk")]
            }
        };
        Ok(lines)
    }
}
