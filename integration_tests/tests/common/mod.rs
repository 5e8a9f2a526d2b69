#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bevy_ecs::world::World;
use webgate_core::host::HostControl;
use webgate_core::{
    build_gateway_runtime, AuditLog, AuthorizationStore, CommandBridge, EventBuffer, Gateway,
    GatewayConfig, GatewayRequest, GatewayResponse, ManualClock,
};

pub const START_MILLIS: u64 = 1_700_000_000_000;
pub const DAY_MILLIS: u64 = 86_400_000;

/// A gateway wired to a live host loop over a temporary data directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<Gateway>,
    pub bridge: CommandBridge<World>,
    pub store: Arc<AuthorizationStore>,
    pub audit: Arc<AuditLog>,
    pub events: Arc<EventBuffer>,
    host: Option<JoinHandle<World>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(adjust: impl FnOnce(&mut GatewayConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = GatewayConfig::builtin();
        config.storage.data_dir = dir.path().to_path_buf();
        config.host.tick_rate_hz = 100;
        config.bridge.timeout_ms = 2_000;
        adjust(&mut config);

        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let events = Arc::new(EventBuffer::new(config.logs.event_buffer_capacity));
        let runtime =
            build_gateway_runtime(&config, clock.clone(), Arc::clone(&events), None, None);

        let host = runtime.host;
        let handle = thread::Builder::new()
            .name("test-host".into())
            .spawn(move || host.run())
            .expect("spawn host thread");

        Self {
            dir,
            clock,
            gateway: runtime.gateway,
            bridge: runtime.bridge,
            store: runtime.store,
            audit: runtime.audit,
            events,
            host: Some(handle),
        }
    }

    pub fn get(&self, url: &str, caller: &str) -> GatewayResponse {
        self.gateway.handle(&GatewayRequest::get(url, ip(caller)))
    }

    pub fn post(&self, url: &str, caller: &str, body: &str) -> GatewayResponse {
        self.gateway
            .handle(&GatewayRequest::post_form(url, ip(caller), body))
    }

    pub fn json(&self, url: &str, caller: &str) -> serde_json::Value {
        let response = self.get(url, caller);
        assert_eq!(response.status, 200, "{url}: {}", response.body_text());
        serde_json::from_slice(&response.body).expect("json body")
    }

    /// Ask the host loop to stop and wait for it, returning the final world.
    pub fn stop(&mut self) -> Option<World> {
        let handle = self.host.take()?;
        let _ = self.bridge.call(|world: &mut World| {
            world.resource_mut::<HostControl>().running = false;
            Ok(())
        });
        handle.join().ok()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn ip(text: &str) -> IpAddr {
    text.parse().expect("test address")
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
