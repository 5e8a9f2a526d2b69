//! Transport-independent request handling for the admin HTTP surface.
//!
//! Every request is admitted against the authorization store before any
//! routing happens. Host data is collected through the command bridge because
//! the world may only be touched by the host thread.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use bevy_ecs::world::World;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use webgate_runtime::{parse_days, parse_ip, AuditCategory, CommandParseError};

use crate::admin::{days, format_expiry, grant_message, revoke_message};
use crate::audit::AuditLog;
use crate::auth_store::AuthorizationStore;
use crate::bridge::{BridgeError, CommandBridge, WorkError};
use crate::console::{dispatch, SystemActor};
use crate::events::EventBuffer;
use crate::host::{host_stats, player_roster, world_roster, HostStats};

pub const BUILTIN_DASHBOARD: &str = include_str!("data/dashboard.html");

const CONTENT_TEXT: &str = "text/plain; charset=utf-8";
const CONTENT_JSON: &str = "application/json";
const CONTENT_HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET") {
            Method::Get
        } else if method.eq_ignore_ascii_case("POST") {
            Method::Post
        } else {
            Method::Other
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    /// Path plus optional query string.
    pub url: String,
    pub peer: Option<IpAddr>,
    pub forwarded_for: Option<String>,
    pub body: Vec<u8>,
}

impl GatewayRequest {
    pub fn get(url: &str, peer: IpAddr) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            peer: Some(peer),
            forwarded_for: None,
            body: Vec::new(),
        }
    }

    pub fn post_form(url: &str, peer: IpAddr, body: &str) -> Self {
        Self {
            method: Method::Post,
            url: url.to_string(),
            peer: Some(peer),
            forwarded_for: None,
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some(CONTENT_TEXT),
            body: body.into().into_bytes(),
        }
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: Some(CONTENT_JSON),
                body,
            },
            Err(err) => {
                warn!(target: "webgate::gateway", error = %err, "gateway.encode_failed");
                Self::empty(500)
            }
        }
    }

    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some(CONTENT_HTML),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Host-independent machine usage, in percent. `None` when not sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemUsage {
    pub cpu: Option<f64>,
    pub system_cpu: Option<f64>,
    pub memory: Option<f64>,
    pub system_memory: Option<f64>,
    pub disk: Option<f64>,
}

pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> SystemUsage;
}

#[derive(Debug, Clone, Serialize)]
struct ResourceReport {
    #[serde(flatten)]
    system: SystemUsage,
    #[serde(flatten)]
    host: HostStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthView {
    ip: String,
    expire_time: u64,
    expires: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Dashboard,
    Players,
    Resources,
    Worlds,
    Command,
    Logs,
    OperationLogs,
    AuthList,
    AuthAdd,
    AuthRemove,
    AuthExtend,
}

impl Route {
    fn resolve(path: &str) -> Option<Self> {
        let route = match path {
            "/" | "/index.html" => Route::Dashboard,
            "/api/players" => Route::Players,
            "/api/resources" => Route::Resources,
            "/api/worlds" => Route::Worlds,
            "/api/command" => Route::Command,
            "/api/logs" => Route::Logs,
            "/api/operation-logs" => Route::OperationLogs,
            "/api/auth" => Route::AuthList,
            "/api/auth/add" => Route::AuthAdd,
            "/api/auth/remove" => Route::AuthRemove,
            "/api/auth/extend" => Route::AuthExtend,
            _ => return None,
        };
        Some(route)
    }

    fn method(self) -> Method {
        match self {
            Route::Command | Route::AuthAdd | Route::AuthRemove | Route::AuthExtend => Method::Post,
            _ => Method::Get,
        }
    }
}

/// Everything the gateway reads from or writes to, built once at startup.
pub struct GatewayDeps {
    pub store: Arc<AuthorizationStore>,
    pub audit: Arc<AuditLog>,
    pub events: Arc<EventBuffer>,
    pub bridge: CommandBridge<World>,
    pub probe: Option<Arc<dyn ResourceProbe>>,
    pub dashboard: String,
    pub trust_forwarded_for: bool,
    pub recent_limit: usize,
}

pub struct Gateway {
    deps: GatewayDeps,
}

impl Gateway {
    pub fn new(deps: GatewayDeps) -> Self {
        Self { deps }
    }

    /// The caller's address: first `X-Forwarded-For` hop when trusted, else the socket peer.
    pub fn resolve_ip(&self, request: &GatewayRequest) -> Option<IpAddr> {
        if self.deps.trust_forwarded_for {
            let forwarded = request
                .forwarded_for
                .as_deref()
                .and_then(|header| header.split(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty());
            if let Some(hop) = forwarded {
                match hop.parse::<IpAddr>() {
                    Ok(ip) => return Some(ip),
                    Err(_) => debug!(
                        target: "webgate::access",
                        forwarded_for = hop,
                        "access.forwarded_for_ignored"
                    ),
                }
            }
        }
        request.peer
    }

    /// Admission check alone, for transports that must answer before reading a body.
    pub fn is_admitted(&self, request: &GatewayRequest) -> bool {
        self.resolve_ip(request)
            .map_or(false, |ip| self.deps.store.is_authorized(&ip.to_string()))
    }

    pub fn handle(&self, request: &GatewayRequest) -> GatewayResponse {
        let path = request.path();
        let Some(caller) = self.resolve_ip(request) else {
            debug!(target: "webgate::access", path, status = 403u16, "access.denied=no_address");
            return GatewayResponse::empty(403);
        };
        let response = self.admit_and_route(caller, request, path);
        debug!(
            target: "webgate::access",
            ip = %caller,
            method = ?request.method,
            path,
            status = response.status,
            "access"
        );
        response
    }

    fn admit_and_route(
        &self,
        caller: IpAddr,
        request: &GatewayRequest,
        path: &str,
    ) -> GatewayResponse {
        if !self.deps.store.is_authorized(&caller.to_string()) {
            return GatewayResponse::empty(403);
        }
        if request.method == Method::Other {
            return GatewayResponse::empty(405);
        }
        let Some(route) = Route::resolve(path) else {
            return GatewayResponse::text(404, "not found");
        };
        if route.method() != request.method {
            return GatewayResponse::empty(405);
        }

        match route {
            Route::Dashboard => GatewayResponse::html(&self.deps.dashboard),
            Route::Players => self.snapshot("players", player_roster),
            Route::Worlds => self.snapshot("worlds", world_roster),
            Route::Resources => self.resources(),
            Route::Command => self.execute_command(caller, &request.body),
            Route::Logs => lines_response(self.deps.events.recent(self.deps.recent_limit)),
            Route::OperationLogs => lines_response(self.deps.audit.recent(self.deps.recent_limit)),
            Route::AuthList => self.list_authorizations(),
            Route::AuthAdd => self.grant(caller, &request.body, "add"),
            Route::AuthExtend => self.grant(caller, &request.body, "extend"),
            Route::AuthRemove => self.revoke(caller, &request.body),
        }
    }

    fn snapshot<T>(&self, what: &'static str, collect: fn(&mut World) -> T) -> GatewayResponse
    where
        T: Serialize + Send + 'static,
    {
        match self.deps.bridge.call(move |world: &mut World| Ok(collect(world))) {
            Ok(value) => GatewayResponse::json(200, &value),
            Err(err) => snapshot_failed(what, &err),
        }
    }

    fn resources(&self) -> GatewayResponse {
        let host = match self.deps.bridge.call(|world: &mut World| Ok(host_stats(world))) {
            Ok(host) => host,
            Err(err) => return snapshot_failed("resources", &err),
        };
        let system = self
            .deps
            .probe
            .as_ref()
            .map(|probe| probe.sample())
            .unwrap_or_default();
        GatewayResponse::json(200, &ResourceReport { system, host })
    }

    fn execute_command(&self, caller: IpAddr, body: &[u8]) -> GatewayResponse {
        let form = parse_form(body);
        let Some(command) = form
            .get("command")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
        else {
            return GatewayResponse::text(400, "missing form field 'command'");
        };

        let line = command.clone();
        let outcome = self.deps.bridge.call(move |world: &mut World| {
            dispatch(world, &SystemActor::REMOTE_ADMIN, &line).map_err(WorkError::from)
        });

        let actor = caller.to_string();
        match outcome {
            Ok(output) => {
                self.deps
                    .audit
                    .record(&actor, AuditCategory::CommandExecution, &command);
                let mut text = format!("Command executed: {command}");
                if !output.is_empty() {
                    text.push('\n');
                    text.push_str(&output);
                }
                GatewayResponse::text(200, text)
            }
            Err(err) => {
                self.deps.audit.record(
                    &actor,
                    AuditCategory::CommandExecution,
                    &format!("{command} (failed: {err})"),
                );
                let status = if err.is_internal() { 500 } else { 400 };
                GatewayResponse::text(status, format!("Command failed: {err}"))
            }
        }
    }

    fn list_authorizations(&self) -> GatewayResponse {
        let entries: Vec<AuthView> = self
            .deps
            .store
            .list_authorized()
            .into_iter()
            .map(|entry| AuthView {
                expires: format_expiry(entry.expires_at_ms),
                expire_time: entry.expires_at_ms,
                ip: entry.ip,
            })
            .collect();
        GatewayResponse::json(200, &entries)
    }

    fn grant(&self, caller: IpAddr, body: &[u8], action: &'static str) -> GatewayResponse {
        let form = parse_form(body);
        let parsed = required(&form, "ip")
            .and_then(parse_ip)
            .and_then(|ip| Ok((ip, required(&form, "days").and_then(parse_days)?)));
        let (ip, count) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return GatewayResponse::text(400, err.to_string()),
        };

        self.deps.store.authorize(&ip.to_string(), days(count));
        let detail = match action {
            "extend" => format!("extend {ip} to {count} day(s) from now"),
            _ => format!("add {ip} for {count} day(s)"),
        };
        self.deps.audit.record(
            &caller.to_string(),
            AuditCategory::AuthorizationChange,
            &detail,
        );
        GatewayResponse::text(200, grant_message(ip, count))
    }

    fn revoke(&self, caller: IpAddr, body: &[u8]) -> GatewayResponse {
        let form = parse_form(body);
        let ip = match required(&form, "ip").and_then(parse_ip) {
            Ok(ip) => ip,
            Err(err) => return GatewayResponse::text(400, err.to_string()),
        };
        self.deps.store.revoke(&ip.to_string());
        self.deps.audit.record(
            &caller.to_string(),
            AuditCategory::AuthorizationChange,
            &format!("remove {ip}"),
        );
        GatewayResponse::text(200, revoke_message(ip))
    }
}

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

fn required<'a>(
    form: &'a HashMap<String, String>,
    field: &'static str,
) -> Result<&'a str, CommandParseError> {
    form.get(field)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or(CommandParseError::MissingArgument(field))
}

fn lines_response(lines: Vec<String>) -> GatewayResponse {
    let mut body = String::new();
    for line in lines {
        body.push_str(&line);
        body.push('\n');
    }
    GatewayResponse::text(200, body)
}

fn snapshot_failed(what: &str, err: &BridgeError) -> GatewayResponse {
    warn!(target: "webgate::gateway", what, error = %err, "gateway.snapshot_failed");
    GatewayResponse::json(
        500,
        &json!({ "error": format!("failed to collect {what}: {err}") }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{command_bridge, BridgeReceiver};
    use crate::clock::ManualClock;
    use crate::config::HostConfig;
    use crate::host::build_host_world;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    const ADMIN: &str = "203.0.113.5";

    struct Harness {
        _dir: tempfile::TempDir,
        gateway: Gateway,
        store: Arc<AuthorizationStore>,
        audit: Arc<AuditLog>,
        receiver: Option<BridgeReceiver<World>>,
    }

    fn harness(trust_forwarded_for: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AuthorizationStore::open(
            dir.path().join("auth_config.txt"),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        ));
        store.authorize(ADMIN, days(1));
        let audit = Arc::new(AuditLog::open(dir.path().join("operation_logs.txt")));
        let (bridge, receiver) = command_bridge::<World>(16, Duration::from_millis(500));
        let gateway = Gateway::new(GatewayDeps {
            store: Arc::clone(&store),
            audit: Arc::clone(&audit),
            events: Arc::new(EventBuffer::new(16)),
            bridge,
            probe: None,
            dashboard: BUILTIN_DASHBOARD.to_string(),
            trust_forwarded_for,
            recent_limit: 100,
        });
        Harness {
            _dir: dir,
            gateway,
            store,
            audit,
            receiver: Some(receiver),
        }
    }

    fn admin() -> IpAddr {
        ADMIN.parse().unwrap()
    }

    fn with_host<R>(h: &mut Harness, f: impl FnOnce(&Gateway) -> R) -> R {
        let receiver = h.receiver.take().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let host_stop = Arc::clone(&stop);
        let host = thread::spawn(move || {
            let mut world = build_host_world(&HostConfig::default());
            while !host_stop.load(Ordering::SeqCst) {
                receiver.serve_until(&mut world, Instant::now() + Duration::from_millis(5), 8);
            }
            receiver
        });
        let out = f(&h.gateway);
        stop.store(true, Ordering::SeqCst);
        h.receiver = Some(host.join().unwrap());
        out
    }

    #[test]
    fn unauthorized_caller_gets_empty_403_everywhere() {
        let h = harness(true);
        let stranger: IpAddr = "10.0.0.9".parse().unwrap();
        for url in ["/", "/api/resources", "/nope"] {
            let response = h.gateway.handle(&GatewayRequest::get(url, stranger));
            assert_eq!(response, GatewayResponse::empty(403), "{url}");
        }
        let mut delete = GatewayRequest::get("/api/auth", stranger);
        delete.method = Method::Other;
        assert_eq!(h.gateway.handle(&delete).status, 403);
    }

    #[test]
    fn forwarded_for_first_hop_wins_when_trusted() {
        let h = harness(true);
        let mut request = GatewayRequest::get("/api/auth", "10.0.0.9".parse().unwrap());
        request.forwarded_for = Some(format!("{ADMIN}, 10.1.1.1"));
        assert_eq!(h.gateway.handle(&request).status, 200);

        request.forwarded_for = Some("garbage".into());
        assert_eq!(h.gateway.resolve_ip(&request), request.peer);

        let untrusting = harness(false);
        request.forwarded_for = Some(ADMIN.into());
        assert_eq!(untrusting.gateway.handle(&request).status, 403);
    }

    #[test]
    fn method_and_path_errors() {
        let h = harness(true);
        let mut other = GatewayRequest::get("/api/players", admin());
        other.method = Method::Other;
        assert_eq!(h.gateway.handle(&other), GatewayResponse::empty(405));

        let wrong = GatewayRequest::get("/api/command", admin());
        assert_eq!(h.gateway.handle(&wrong), GatewayResponse::empty(405));

        let wrong = GatewayRequest::post_form("/api/players", admin(), "");
        assert_eq!(h.gateway.handle(&wrong), GatewayResponse::empty(405));

        assert_eq!(
            h.gateway
                .handle(&GatewayRequest::get("/api/unknown", admin()))
                .status,
            404
        );
    }

    #[test]
    fn dashboard_is_served() {
        let h = harness(true);
        let response = h.gateway.handle(&GatewayRequest::get("/", admin()));
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, Some(CONTENT_HTML));
        assert!(response.body_text().contains("<title>webgate</title>"));
    }

    #[test]
    fn auth_add_validates_and_audits() {
        let h = harness(true);
        let bad = [
            "ip=not-an-ip&days=3",
            "ip=198.51.100.2&days=0",
            "ip=198.51.100.2&days=36501",
            "ip=198.51.100.2&days=abc",
            "days=3",
            "ip=198.51.100.2",
        ];
        for body in bad {
            let response = h
                .gateway
                .handle(&GatewayRequest::post_form("/api/auth/add", admin(), body));
            assert_eq!(response.status, 400, "{body}");
        }
        assert_eq!(h.store.list_authorized().len(), 1);
        assert!(h.audit.recent(10).is_empty());

        let response = h.gateway.handle(&GatewayRequest::post_form(
            "/api/auth/add",
            admin(),
            "ip=198.51.100.2&days=3",
        ));
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "authorized 198.51.100.2 for 3 day(s)");
        let record = h.audit.recent_records(1).pop().unwrap();
        assert_eq!(record.actor_ip, ADMIN);
        assert_eq!(record.category, AuditCategory::AuthorizationChange);
    }

    #[test]
    fn extend_overwrites_and_remove_is_idempotent() {
        let h = harness(true);
        h.gateway.handle(&GatewayRequest::post_form(
            "/api/auth/add",
            admin(),
            "ip=198.51.100.2&days=30",
        ));
        h.gateway.handle(&GatewayRequest::post_form(
            "/api/auth/extend",
            admin(),
            "ip=198.51.100.2&days=1",
        ));
        let entry = h.store.entry("198.51.100.2").unwrap();
        assert_eq!(entry.expires_at_ms - entry.granted_at_ms, 86_400_000);

        for _ in 0..2 {
            let response = h.gateway.handle(&GatewayRequest::post_form(
                "/api/auth/remove",
                admin(),
                "ip=198.51.100.2",
            ));
            assert_eq!(response.status, 200);
        }
        assert!(h.store.entry("198.51.100.2").is_none());
    }

    #[test]
    fn auth_list_is_json() {
        let h = harness(true);
        let response = h.gateway.handle(&GatewayRequest::get("/api/auth", admin()));
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value[0]["ip"], ADMIN);
        assert_eq!(value[0]["expireTime"], 1_700_000_000_000u64 + 86_400_000);
    }

    #[test]
    fn command_runs_on_host_and_is_audited() {
        let mut h = harness(true);
        let response = with_host(&mut h, |gateway| {
            gateway.handle(&GatewayRequest::post_form(
                "/api/command",
                admin(),
                "command=say+hello%21",
            ))
        });
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body_text(),
            "Command executed: say hello!\n[WebManager] hello!"
        );
        let record = h.audit.recent_records(1).pop().unwrap();
        assert_eq!(record.category, AuditCategory::CommandExecution);
        assert_eq!(record.detail, "say hello!");
    }

    #[test]
    fn rejected_command_is_400_and_audited_as_failed() {
        let mut h = harness(true);
        let response = with_host(&mut h, |gateway| {
            gateway.handle(&GatewayRequest::post_form(
                "/api/command",
                admin(),
                "command=fly",
            ))
        });
        assert_eq!(response.status, 400);
        assert_eq!(response.body_text(), "Command failed: unknown command 'fly'");
        let record = h.audit.recent_records(1).pop().unwrap();
        assert_eq!(record.detail, "fly (failed: unknown command 'fly')");
    }

    #[test]
    fn stalled_host_yields_500() {
        let h = harness(true);
        let response = h.gateway.handle(&GatewayRequest::post_form(
            "/api/command",
            admin(),
            "command=list",
        ));
        assert_eq!(response.status, 500);
        assert!(response.body_text().starts_with("Command failed: timed out"));

        let response = h.gateway.handle(&GatewayRequest::get("/api/players", admin()));
        assert_eq!(response.status, 500);
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("players"));
    }

    #[test]
    fn resources_merge_host_stats_and_probe() {
        let mut h = harness(true);
        let response = with_host(&mut h, |gateway| {
            gateway.handle(&GatewayRequest::get("/api/resources", admin()))
        });
        assert_eq!(response.status, 200);
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(value["cpu"].is_null());
        assert_eq!(value["maxPlayers"], 20);
        assert_eq!(value["onlinePlayers"], 0);
        assert!(value.get("loadedChunks").is_some());
    }

    #[test]
    fn missing_command_field_is_400() {
        let h = harness(true);
        let response = h
            .gateway
            .handle(&GatewayRequest::post_form("/api/command", admin(), "cmd=list"));
        assert_eq!(response.status, 400);
    }

    #[test]
    fn operation_logs_are_newline_terminated() {
        let h = harness(true);
        h.audit
            .record("10.0.0.1", AuditCategory::CommandExecution, "list");
        let response = h
            .gateway
            .handle(&GatewayRequest::get("/api/operation-logs", admin()));
        let body = response.body_text();
        assert!(body.ends_with("command-execution, list\n"), "{body}");
    }
}
