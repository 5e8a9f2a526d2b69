use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use webgate_runtime::AuditCategory;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parsed form of one audit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub actor_ip: String,
    pub category: AuditCategory,
    pub detail: String,
}

impl AuditRecord {
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(4, ", ");
        let timestamp = parts.next()?.to_string();
        let actor_ip = parts.next()?.to_string();
        let category = parts.next()?.parse().ok()?;
        let detail = parts.next().unwrap_or_default().to_string();
        Some(Self {
            timestamp,
            actor_ip,
            category,
            detail,
        })
    }
}

/// Append-only record of privileged actions.
///
/// Writes are best effort: a failed append is logged and dropped so auditing
/// never fails the action it describes.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, actor_ip: &str, category: AuditCategory, detail: &str) {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let line = format!(
            "{timestamp}, {}, {category}, {}\n",
            single_line(actor_ip),
            single_line(detail)
        );
        let _guard = self.lock.lock();
        if let Err(err) = self.append(&line) {
            warn!(
                target: "webgate::audit",
                path = %self.path.display(),
                error = %err,
                "audit.append_failed"
            );
        }
    }

    /// The newest `limit` lines, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let contents = {
            let _guard = self.lock.lock();
            match fs::read_to_string(&self.path) {
                Ok(contents) => contents,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
                Err(err) => {
                    warn!(
                        target: "webgate::audit",
                        path = %self.path.display(),
                        error = %err,
                        "audit.read_failed"
                    );
                    return Vec::new();
                }
            }
        };
        let lines: Vec<&str> = contents.lines().filter(|l| !l.is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..].iter().map(|l| l.to_string()).collect()
    }

    pub fn recent_records(&self, limit: usize) -> Vec<AuditRecord> {
        self.recent(limit)
            .iter()
            .filter_map(|line| AuditRecord::parse_line(line))
            .collect()
    }

    pub fn clear(&self) {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                target: "webgate::audit",
                path = %self.path.display(),
                error = %err,
                "audit.clear_failed"
            ),
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
