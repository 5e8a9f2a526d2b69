//! Access-gated command gateway for a single-threaded host process.
//!
//! HTTP workers admit callers against a time-limited IP allow-list and reach
//! the host world only through the command bridge, which the host loop drains
//! between ticks. Privileged actions land in an append-only audit log.

pub mod admin;
pub mod audit;
pub mod auth_store;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod console;
pub mod events;
pub mod gateway;
pub mod host;
pub mod http;
pub mod probe;

use std::sync::Arc;

use bevy_ecs::world::World;

pub use admin::{WebManagerCommand, ADMIN_PERMISSION};
pub use audit::{AuditLog, AuditRecord};
pub use auth_store::{AuthorizationEntry, AuthorizationStore};
pub use bridge::{
    command_bridge, BridgeError, BridgeReceiver, CommandBridge, CommandRequest, WorkError,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_gateway_config, ConfigError, GatewayConfig};
pub use console::{
    dispatch, CommandSender, ConsoleCommand, ConsoleError, ConsoleRegistry, SystemActor,
};
pub use events::{EventBuffer, EventBufferLayer};
pub use gateway::{
    Gateway, GatewayDeps, GatewayRequest, GatewayResponse, Method, ResourceProbe, SystemUsage,
    BUILTIN_DASHBOARD,
};
pub use host::{build_host_world, spawn_player, GameMode, HostLoop};
pub use http::{HttpServer, ServerError};
pub use probe::SysinfoProbe;

/// The wired-up gateway: a host loop to run on the authoritative thread and
/// the shared handles the transport and console need.
pub struct GatewayRuntime {
    pub host: HostLoop,
    pub gateway: Arc<Gateway>,
    pub bridge: CommandBridge<World>,
    pub store: Arc<AuthorizationStore>,
    pub audit: Arc<AuditLog>,
}

/// Build every component from `config` and connect them.
///
/// `dashboard` replaces the builtin page when given.
pub fn build_gateway_runtime(
    config: &GatewayConfig,
    clock: Arc<dyn Clock>,
    events: Arc<EventBuffer>,
    probe: Option<Arc<dyn ResourceProbe>>,
    dashboard: Option<String>,
) -> GatewayRuntime {
    let store = Arc::new(AuthorizationStore::open(config.auth_path(), clock));
    let audit = Arc::new(AuditLog::open(config.audit_path()));
    let (bridge, receiver) =
        command_bridge::<World>(config.bridge.queue_capacity, config.bridge.timeout());

    let mut world = build_host_world(&config.host);
    world
        .resource_mut::<ConsoleRegistry>()
        .register(Arc::new(WebManagerCommand::new(
            Arc::clone(&store),
            Arc::clone(&audit),
        )));
    world.insert_resource(host::AuthorizationSweep {
        store: Arc::clone(&store),
        every_ticks: config.host.sweep_interval_ticks,
    });
    let host = HostLoop::new(
        world,
        receiver,
        config.host.tick_interval(),
        config.bridge.jobs_per_tick,
    );

    let gateway = Arc::new(Gateway::new(GatewayDeps {
        store: Arc::clone(&store),
        audit: Arc::clone(&audit),
        events,
        bridge: bridge.clone(),
        probe,
        dashboard: dashboard.unwrap_or_else(|| BUILTIN_DASHBOARD.to_string()),
        trust_forwarded_for: config.http.trust_forwarded_for,
        recent_limit: config.logs.recent_limit,
    }));

    GatewayRuntime {
        host,
        gateway,
        bridge,
        store,
        audit,
    }
}
