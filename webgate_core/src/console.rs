//! Host console: named commands executed against the world on the host thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use thiserror::Error;
use tracing::{info, warn};
use webgate_runtime::{parse_console_line, CommandParseError};

use crate::bridge::WorkError;
use crate::host::{find_player, player_roster, Broadcasts, HostControl, TickMetrics};

/// Who issued a console command.
pub trait CommandSender {
    fn name(&self) -> &str;
    fn has_permission(&self, node: &str) -> bool;
}

/// Built-in identities that hold every permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemActor {
    name: &'static str,
}

impl SystemActor {
    /// Identity used for commands arriving over HTTP.
    pub const REMOTE_ADMIN: SystemActor = SystemActor { name: "WebManager" };
    /// Identity used for lines typed at the server terminal.
    pub const HOST_CONSOLE: SystemActor = SystemActor { name: "CONSOLE" };
}

impl CommandSender for SystemActor {
    fn name(&self) -> &str {
        self.name
    }

    fn has_permission(&self, _node: &str) -> bool {
        true
    }
}

/// A sender with an explicit permission list. `*` grants everything.
#[derive(Debug, Clone)]
pub struct Operator {
    name: String,
    permissions: Vec<String>,
}

impl Operator {
    pub fn new(name: impl Into<String>, permissions: &[&str]) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl CommandSender for Operator {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_permission(&self, node: &str) -> bool {
        self.permissions.iter().any(|p| p == "*" || p == node)
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{sender} lacks permission '{permission}'")]
    PermissionDenied { sender: String, permission: String },
    #[error("{0}")]
    Rejected(String),
}

impl From<ConsoleError> for WorkError {
    fn from(err: ConsoleError) -> Self {
        WorkError::new(err.to_string())
    }
}

pub trait ConsoleCommand: Send + Sync {
    fn label(&self) -> &'static str;

    fn usage(&self) -> &'static str;

    fn permission(&self) -> Option<&'static str> {
        None
    }

    /// Run the command, returning the lines shown to the sender.
    fn execute(
        &self,
        world: &mut World,
        sender: &dyn CommandSender,
        args: &[&str],
    ) -> Result<Vec<String>, ConsoleError>;
}

#[derive(Resource, Default, Clone)]
pub struct ConsoleRegistry {
    commands: BTreeMap<&'static str, Arc<dyn ConsoleCommand>>,
}

impl ConsoleRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(HelpCommand));
        registry.register(Arc::new(SayCommand));
        registry.register(Arc::new(ListCommand));
        registry.register(Arc::new(TpsCommand));
        registry.register(Arc::new(KickCommand));
        registry.register(Arc::new(StopCommand));
        registry
    }

    /// Later registrations replace earlier ones with the same label.
    pub fn register(&mut self, command: Arc<dyn ConsoleCommand>) {
        self.commands.insert(command.label(), command);
    }

    pub fn get(&self, label: &str) -> Option<Arc<dyn ConsoleCommand>> {
        self.commands.get(label).cloned()
    }
}

/// Parse and run one console line as `sender`, returning its output text.
pub fn dispatch(
    world: &mut World,
    sender: &dyn CommandSender,
    input: &str,
) -> Result<String, ConsoleError> {
    let line = parse_console_line(input)?;
    let command = world
        .get_resource::<ConsoleRegistry>()
        .and_then(|registry| registry.get(&line.verb))
        .ok_or_else(|| ConsoleError::UnknownCommand(line.verb.clone()))?;

    if let Some(permission) = command.permission() {
        if !sender.has_permission(permission) {
            warn!(
                target: "webgate::console",
                sender = sender.name(),
                permission,
                "console.denied={}",
                line.verb
            );
            return Err(ConsoleError::PermissionDenied {
                sender: sender.name().to_string(),
                permission: permission.to_string(),
            });
        }
    }

    info!(
        target: "webgate::console",
        "{} issued server command: {}",
        sender.name(),
        input.trim()
    );
    let output = command.execute(world, sender, &line.arg_refs())?;
    Ok(output.join("\n"))
}

struct HelpCommand;

impl ConsoleCommand for HelpCommand {
    fn label(&self) -> &'static str {
        "help"
    }

    fn usage(&self) -> &'static str {
        "help"
    }

    fn execute(
        &self,
        world: &mut World,
        _sender: &dyn CommandSender,
        _args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        let Some(registry) = world.get_resource::<ConsoleRegistry>() else {
            return Ok(Vec::new());
        };
        Ok(registry
            .commands
            .values()
            .map(|command| command.usage().to_string())
            .collect())
    }
}

struct SayCommand;

impl ConsoleCommand for SayCommand {
    fn label(&self) -> &'static str {
        "say"
    }

    fn usage(&self) -> &'static str {
        "say <message>"
    }

    fn execute(
        &self,
        world: &mut World,
        sender: &dyn CommandSender,
        args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        if args.is_empty() {
            return Err(ConsoleError::Rejected(format!("usage: {}", self.usage())));
        }
        let message = format!("[{}] {}", sender.name(), args.join(" "));
        info!(target: "webgate::chat", "{message}");
        world
            .get_resource_or_insert_with(Broadcasts::default)
            .push(message.clone());
        Ok(vec![message])
    }
}

struct ListCommand;

impl ConsoleCommand for ListCommand {
    fn label(&self) -> &'static str {
        "list"
    }

    fn usage(&self) -> &'static str {
        "list"
    }

    fn execute(
        &self,
        world: &mut World,
        _sender: &dyn CommandSender,
        _args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        let roster = player_roster(world);
        let names: Vec<&str> = roster.players.iter().map(|p| p.name.as_str()).collect();
        Ok(vec![format!(
            "There are {} of a max of {} players online: {}",
            roster.online,
            roster.max,
            names.join(", ")
        )])
    }
}

struct TpsCommand;

impl ConsoleCommand for TpsCommand {
    fn label(&self) -> &'static str {
        "tps"
    }

    fn usage(&self) -> &'static str {
        "tps"
    }

    fn execute(
        &self,
        world: &mut World,
        _sender: &dyn CommandSender,
        _args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        let tps = world
            .get_resource::<TickMetrics>()
            .map_or(0.0, |metrics| metrics.tps);
        Ok(vec![format!("TPS: {tps:.1}")])
    }
}

struct KickCommand;

impl ConsoleCommand for KickCommand {
    fn label(&self) -> &'static str {
        "kick"
    }

    fn usage(&self) -> &'static str {
        "kick <player>"
    }

    fn permission(&self) -> Option<&'static str> {
        Some("server.kick")
    }

    fn execute(
        &self,
        world: &mut World,
        _sender: &dyn CommandSender,
        args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        let [name] = args else {
            return Err(ConsoleError::Rejected(format!("usage: {}", self.usage())));
        };
        let entity = find_player(world, name)
            .ok_or_else(|| ConsoleError::Rejected(format!("player '{name}' is not online")))?;
        world.despawn(entity);
        Ok(vec![format!("Kicked {name}")])
    }
}

struct StopCommand;

impl ConsoleCommand for StopCommand {
    fn label(&self) -> &'static str {
        "stop"
    }

    fn usage(&self) -> &'static str {
        "stop"
    }

    fn permission(&self) -> Option<&'static str> {
        Some("server.stop")
    }

    fn execute(
        &self,
        world: &mut World,
        _sender: &dyn CommandSender,
        _args: &[&str],
    ) -> Result<Vec<String>, ConsoleError> {
        world.get_resource_or_insert_with(HostControl::default).running = false;
        Ok(vec!["Stopping the server".to_string()])
    }
}
