//! The authoritative host: an ECS world ticked at a fixed rate by one thread.
//!
//! Nothing in here is shared across threads. Other threads reach the world
//! only through the command bridge, which [`HostLoop`] drains between ticks.

use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::auth_store::AuthorizationStore;
use crate::bridge::BridgeReceiver;
use crate::config::{HostConfig, RealmConfig};
use crate::console::ConsoleRegistry;

const BROADCAST_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

#[derive(Component, Debug, Clone)]
pub struct Player {
    pub name: String,
    pub uuid: String,
    pub address: Option<IpAddr>,
    pub game_mode: GameMode,
    pub realm: String,
}

#[derive(Component, Debug, Clone)]
pub struct Realm {
    pub name: String,
    pub environment: String,
    pub seed: i64,
    pub loaded_chunks: u32,
    pub ambient_entities: u32,
}

impl From<&RealmConfig> for Realm {
    fn from(config: &RealmConfig) -> Self {
        Self {
            name: config.name.clone(),
            environment: config.environment.clone(),
            seed: config.seed,
            loaded_chunks: config.loaded_chunks,
            ambient_entities: config.ambient_entities,
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct HostInfo {
    pub version: String,
    pub max_players: u32,
    pub tick_rate_hz: u32,
}

#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostTick(pub u64);

#[derive(Resource, Debug, Clone)]
pub struct TickMetrics {
    pub tps: f64,
    last_tick: Option<Instant>,
}

#[derive(Resource, Debug, Clone)]
pub struct HostControl {
    pub running: bool,
}

impl Default for HostControl {
    fn default() -> Self {
        Self { running: true }
    }
}

/// Recent chat broadcasts issued through `say`.
#[derive(Resource, Debug, Default, Clone)]
pub struct Broadcasts {
    messages: Vec<String>,
}

impl Broadcasts {
    pub fn push(&mut self, message: String) {
        if self.messages.len() == BROADCAST_HISTORY {
            self.messages.remove(0);
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

/// Periodic expiry sweep of the authorization list, driven by the tick count.
#[derive(Resource, Clone)]
pub struct AuthorizationSweep {
    pub store: Arc<AuthorizationStore>,
    pub every_ticks: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerView {
    pub name: String,
    pub uuid: String,
    pub ip: String,
    pub gamemode: GameMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerRoster {
    pub online: usize,
    pub max: u32,
    pub version: String,
    pub players: Vec<PlayerView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealmView {
    pub name: String,
    #[serde(rename = "type")]
    pub environment: String,
    pub seed: i64,
    pub players: usize,
    pub entities: u64,
    pub chunks: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorldRoster {
    pub worlds: Vec<RealmView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub tps: f64,
    pub entities: u64,
    pub online_players: usize,
    pub max_players: u32,
    pub loaded_chunks: u64,
}

/// Build the host world with its realms, resources and console commands.
pub fn build_host_world(config: &HostConfig) -> World {
    let mut world = World::new();
    world.insert_resource(HostInfo {
        version: config.version.clone(),
        max_players: config.max_players,
        tick_rate_hz: config.tick_rate_hz.max(1),
    });
    world.insert_resource(HostTick::default());
    world.insert_resource(TickMetrics {
        tps: f64::from(config.tick_rate_hz.max(1)),
        last_tick: None,
    });
    world.insert_resource(HostControl::default());
    world.insert_resource(Broadcasts::default());
    world.insert_resource(ConsoleRegistry::with_builtins());
    for realm in &config.realms {
        world.spawn(Realm::from(realm));
    }
    world
}

/// Systems run once per tick, in order.
pub fn host_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems((advance_tick, measure_tps, sweep_authorizations).chain());
    schedule
}

pub fn spawn_player(
    world: &mut World,
    name: &str,
    address: Option<IpAddr>,
    realm: &str,
    game_mode: GameMode,
) -> Entity {
    world
        .spawn(Player {
            name: name.to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
            address,
            game_mode,
            realm: realm.to_string(),
        })
        .id()
}

pub fn find_player(world: &mut World, name: &str) -> Option<Entity> {
    let mut players = world.query::<(Entity, &Player)>();
    players
        .iter(world)
        .find(|(_, player)| player.name.eq_ignore_ascii_case(name))
        .map(|(entity, _)| entity)
}

pub fn player_roster(world: &mut World) -> PlayerRoster {
    let mut query = world.query::<&Player>();
    let mut players: Vec<PlayerView> = query
        .iter(world)
        .map(|player| PlayerView {
            name: player.name.clone(),
            uuid: player.uuid.clone(),
            ip: player
                .address
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            gamemode: player.game_mode,
        })
        .collect();
    players.sort_by(|a, b| a.name.cmp(&b.name));

    let info = world.resource::<HostInfo>();
    PlayerRoster {
        online: players.len(),
        max: info.max_players,
        version: info.version.clone(),
        players,
    }
}

pub fn world_roster(world: &mut World) -> WorldRoster {
    let mut player_query = world.query::<&Player>();
    let player_realms: Vec<String> = player_query
        .iter(world)
        .map(|player| player.realm.clone())
        .collect();

    let mut realm_query = world.query::<&Realm>();
    let worlds = realm_query
        .iter(world)
        .map(|realm| {
            let players = player_realms.iter().filter(|r| **r == realm.name).count();
            RealmView {
                name: realm.name.clone(),
                environment: realm.environment.clone(),
                seed: realm.seed,
                players,
                entities: u64::from(realm.ambient_entities) + players as u64,
                chunks: realm.loaded_chunks,
            }
        })
        .collect();
    WorldRoster { worlds }
}

pub fn host_stats(world: &mut World) -> HostStats {
    let roster = world_roster(world);
    let online_players = roster.worlds.iter().map(|w| w.players).sum();
    let info = world.resource::<HostInfo>();
    let tps = world.resource::<TickMetrics>().tps;
    HostStats {
        tps: (tps * 10.0).round() / 10.0,
        entities: roster.worlds.iter().map(|w| w.entities).sum(),
        online_players,
        max_players: info.max_players,
        loaded_chunks: roster.worlds.iter().map(|w| u64::from(w.chunks)).sum(),
    }
}

fn advance_tick(mut tick: ResMut<HostTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

fn measure_tps(mut metrics: ResMut<TickMetrics>, info: Res<HostInfo>) {
    let now = Instant::now();
    if let Some(last) = metrics.last_tick {
        let elapsed = now.duration_since(last).as_secs_f64();
        if elapsed > 0.0 {
            let ceiling = f64::from(info.tick_rate_hz);
            let instant = (1.0 / elapsed).min(ceiling);
            metrics.tps = metrics.tps * 0.9 + instant * 0.1;
        }
    }
    metrics.last_tick = Some(now);
}

fn sweep_authorizations(tick: Res<HostTick>, sweep: Option<Res<AuthorizationSweep>>) {
    let Some(sweep) = sweep else {
        return;
    };
    if sweep.every_ticks > 0 && tick.0 % sweep.every_ticks == 0 {
        sweep.store.sweep_expired();
    }
}

/// Owns the world and runs it on the current thread until a `stop` command.
pub struct HostLoop {
    world: World,
    schedule: Schedule,
    bridge: BridgeReceiver<World>,
    tick_interval: Duration,
    jobs_per_tick: usize,
}

impl HostLoop {
    pub fn new(
        world: World,
        bridge: BridgeReceiver<World>,
        tick_interval: Duration,
        jobs_per_tick: usize,
    ) -> Self {
        Self {
            world,
            schedule: host_schedule(),
            bridge,
            tick_interval,
            jobs_per_tick: jobs_per_tick.max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.world
            .get_resource::<HostControl>()
            .map_or(false, |control| control.running)
    }

    /// One tick: run the schedule, then serve bridged work until the next tick is due.
    pub fn tick(&mut self, next_tick: Instant) -> usize {
        self.schedule.run(&mut self.world);
        self.bridge
            .serve_until(&mut self.world, next_tick, self.jobs_per_tick)
    }

    pub fn run(mut self) -> World {
        info!(
            target: "webgate::host",
            tick_ms = self.tick_interval.as_millis() as u64,
            "host.loop_started"
        );
        let mut next_tick = Instant::now();
        while self.is_running() {
            next_tick += self.tick_interval;
            let now = Instant::now();
            if next_tick < now {
                // fell behind; drop the backlog instead of spinning
                next_tick = now;
            }
            self.tick(next_tick);
            let now = Instant::now();
            if now < next_tick {
                thread::sleep(next_tick - now);
            }
        }
        let tick = self.world.resource::<HostTick>().0;
        info!(target: "webgate::host", tick, "host.loop_stopped");
        self.world
    }
}
