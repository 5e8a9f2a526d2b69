//! tiny_http transport: a fixed pool of worker threads sharing one listener.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tiny_http::{Header, Request, Response, Server};
use tracing::{info, warn};

use crate::gateway::{Gateway, GatewayRequest, GatewayResponse, Method};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind http server on {addr}: {message}")]
    Bind { addr: SocketAddr, message: String },
    #[error("failed to spawn http worker: {0}")]
    Spawn(#[from] io::Error),
}

pub struct HttpServer {
    server: Arc<Server>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl HttpServer {
    pub fn start(
        bind: SocketAddr,
        workers: usize,
        max_body_bytes: usize,
        gateway: Arc<Gateway>,
    ) -> Result<Self, ServerError> {
        let server = Server::http(bind).map_err(|err| ServerError::Bind {
            addr: bind,
            message: err.to_string(),
        })?;
        let local_addr = server.server_addr().to_ip().unwrap_or(bind);
        let server = Arc::new(server);
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let server = Arc::clone(&server);
            let stop = Arc::clone(&stop);
            let gateway = Arc::clone(&gateway);
            let handle = thread::Builder::new()
                .name(format!("webgate-http-{index}"))
                .spawn(move || worker_loop(&server, &stop, &gateway, max_body_bytes))?;
            handles.push(handle);
        }

        info!(
            target: "webgate::gateway",
            addr = %local_addr,
            workers = handles.len(),
            "http.listening"
        );
        Ok(Self {
            server,
            stop,
            workers: handles,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, let in-flight requests finish, and join every worker.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        for _ in &self.workers {
            self.server.unblock();
        }
        for worker in self.workers {
            if worker.join().is_err() {
                warn!(target: "webgate::gateway", "http.worker_panicked");
            }
        }
        info!(target: "webgate::gateway", "http.stopped");
    }
}

fn worker_loop(server: &Server, stop: &AtomicBool, gateway: &Gateway, max_body_bytes: usize) {
    while !stop.load(Ordering::SeqCst) {
        let request = match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!(target: "webgate::gateway", error = %err, "http.accept_failed");
                continue;
            }
        };
        serve_request(gateway, request, max_body_bytes);
    }
}

fn serve_request(gateway: &Gateway, mut request: Request, max_body_bytes: usize) {
    let mut envelope = GatewayRequest {
        method: Method::parse(request.method().as_str()),
        url: request.url().to_string(),
        peer: request.remote_addr().map(|addr| addr.ip()),
        forwarded_for: header_value(&request, "X-Forwarded-For"),
        body: Vec::new(),
    };

    let response = match read_to_end_limited(request.as_reader(), max_body_bytes) {
        Ok(body) => {
            envelope.body = body;
            gateway.handle(&envelope)
        }
        Err(BodyError::TooLarge) if gateway.is_admitted(&envelope) => GatewayResponse::empty(413),
        Err(BodyError::TooLarge) => GatewayResponse::empty(403),
        Err(BodyError::Io(err)) => {
            warn!(target: "webgate::gateway", error = %err, "http.body_read_failed");
            GatewayResponse::empty(400)
        }
    };

    if let Err(err) = request.respond(to_tiny_response(response)) {
        warn!(target: "webgate::gateway", error = %err, "http.respond_failed");
    }
}

fn to_tiny_response(response: GatewayResponse) -> Response<io::Cursor<Vec<u8>>> {
    let mut tiny = Response::from_data(response.body).with_status_code(response.status);
    if let Some(content_type) = response.content_type {
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
            tiny = tiny.with_header(header);
        }
    }
    tiny
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(name))
        .map(|header| header.value.as_str().to_string())
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Io(io::Error),
}

fn read_to_end_limited<R: Read>(reader: R, max_bytes: usize) -> Result<Vec<u8>, BodyError> {
    let mut body = Vec::new();
    reader
        .take(max_bytes.saturating_add(1) as u64)
        .read_to_end(&mut body)
        .map_err(BodyError::Io)?;
    if body.len() > max_bytes {
        return Err(BodyError::TooLarge);
    }
    Ok(body)
}
