//! IP allow-list with per-entry expiry, persisted as a flat text file.
//!
//! Every mutation rewrites the whole file. The in-memory map is the source of
//! truth for the lifetime of the process; disk failures are logged and
//! otherwise ignored so a read-only data directory never takes the gateway
//! down.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;

const FILE_HEADER: &str = "# webgate authorization list\n# format: ip, granted_at_ms, expires_at_ms\n\n";

/// A single authorized address and the window it is valid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationEntry {
    pub ip: String,
    pub granted_at_ms: u64,
    pub expires_at_ms: u64,
}

impl AuthorizationEntry {
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }
}

pub struct AuthorizationStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, AuthorizationEntry>>,
    // Held from a mutation's map change through its file rewrite, and by
    // `reload`. Always taken before `entries`.
    io_lock: Mutex<()>,
}

impl AuthorizationStore {
    /// Open the store backed by `path`, loading whatever valid entries it holds.
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let path = path.into();
        let entries = load_entries(&path, clock.now_millis());
        info!(
            target: "webgate::store",
            path = %path.display(),
            entries = entries.len(),
            "authorization_store.loaded"
        );
        Self {
            path,
            clock,
            entries: Mutex::new(entries),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grant `ip` access for `duration` from now, replacing any earlier grant.
    pub fn authorize(&self, ip: &str, duration: Duration) -> AuthorizationEntry {
        let now = self.clock.now_millis();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let entry = AuthorizationEntry {
            ip: ip.to_string(),
            granted_at_ms: now,
            expires_at_ms: now.saturating_add(duration_ms),
        };
        let _io = self.io_lock.lock();
        self.entries.lock().insert(entry.ip.clone(), entry.clone());
        info!(
            target: "webgate::store",
            ip,
            expires_at_ms = entry.expires_at_ms,
            "authorization.granted"
        );
        self.persist_locked();
        entry
    }

    /// Remove `ip`. Returns whether an entry was present.
    pub fn revoke(&self, ip: &str) -> bool {
        let _io = self.io_lock.lock();
        let removed = self.entries.lock().remove(ip).is_some();
        if removed {
            info!(target: "webgate::store", ip, "authorization.revoked");
            self.persist_locked();
        }
        removed
    }

    /// Admission check. An expired entry found here is evicted on the spot.
    pub fn is_authorized(&self, ip: &str) -> bool {
        let now = self.clock.now_millis();
        match self.entries.lock().get(ip) {
            None => return false,
            Some(entry) if entry.is_live(now) => return true,
            Some(_) => {}
        }

        // Re-check under the I/O lock; a grant may have replaced the stale entry.
        let _io = self.io_lock.lock();
        let evicted = {
            let mut entries = self.entries.lock();
            match entries.get(ip) {
                None => return false,
                Some(entry) if entry.is_live(now) => return true,
                Some(_) => entries.remove(ip).is_some(),
            }
        };
        if evicted {
            debug!(target: "webgate::store", ip, "authorization.expired");
            self.persist_locked();
        }
        false
    }

    pub fn entry(&self, ip: &str) -> Option<AuthorizationEntry> {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .get(ip)
            .filter(|entry| entry.is_live(now))
            .cloned()
    }

    /// Snapshot of live entries ordered by address.
    pub fn list_authorized(&self) -> Vec<AuthorizationEntry> {
        let now = self.clock.now_millis();
        let mut live: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.is_live(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.ip.cmp(&b.ip));
        live
    }

    /// Drop every expired entry in one pass, writing the file at most once.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let _io = self.io_lock.lock();
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            before - entries.len()
        };
        if removed > 0 {
            info!(target: "webgate::store", removed, "authorization.swept");
            self.persist_locked();
        }
        removed
    }

    /// Replace the in-memory map with the current file contents.
    pub fn reload(&self) -> usize {
        let _io = self.io_lock.lock();
        let loaded = load_entries(&self.path, self.clock.now_millis());
        let count = loaded.len();
        *self.entries.lock() = loaded;
        info!(target: "webgate::store", entries = count, "authorization_store.reloaded");
        count
    }

    pub fn len(&self) -> usize {
        self.list_authorized().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite the file from the current map. Callers hold `io_lock`.
    fn persist_locked(&self) {
        let mut snapshot: Vec<_> = self.entries.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| a.ip.cmp(&b.ip));
        if let Err(err) = write_entries(&self.path, &snapshot) {
            warn!(
                target: "webgate::store",
                path = %self.path.display(),
                error = %err,
                "authorization_store.persist_failed"
            );
        }
    }
}

fn load_entries(path: &Path, now_ms: u64) -> HashMap<String, AuthorizationEntry> {
    let mut entries = HashMap::new();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return entries,
        Err(err) => {
            warn!(
                target: "webgate::store",
                path = %path.display(),
                error = %err,
                "authorization_store.read_failed"
            );
            return entries;
        }
    };

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_entry_line(trimmed) {
            Some(entry) if entry.is_live(now_ms) => {
                entries.insert(entry.ip.clone(), entry);
            }
            Some(entry) => debug!(
                target: "webgate::store",
                ip = %entry.ip,
                "authorization_store.skipped=expired"
            ),
            None => warn!(
                target: "webgate::store",
                line = index + 1,
                "authorization_store.skipped=malformed"
            ),
        }
    }
    entries
}

pub(crate) fn parse_entry_line(line: &str) -> Option<AuthorizationEntry> {
    let mut parts = line.split(',').map(str::trim);
    let ip: IpAddr = parts.next()?.parse().ok()?;
    let granted_at_ms = parts.next()?.parse().ok()?;
    let expires_at_ms = parts.next()?.parse().ok()?;
    Some(AuthorizationEntry {
        ip: ip.to_string(),
        granted_at_ms,
        expires_at_ms,
    })
}

fn render_entries(entries: &[AuthorizationEntry]) -> String {
    let mut out = String::from(FILE_HEADER);
    for entry in entries {
        out.push_str(&format!(
            "{}, {}, {}\n",
            entry.ip, entry.granted_at_ms, entry.expires_at_ms
        ));
    }
    out
}

fn write_entries(path: &Path, entries: &[AuthorizationEntry]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(render_entries(entries).as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
