//! Alert payloads and the sinks they are published to.
//!
//! Alerts are a separate channel from operational logging: one JSON line
//! per watcher cycle, written to a size-bounded rotating file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::book::Activity;

// ── Payloads ──────────────────────────────────────────────────────

/// What is wrong with a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Diagnostic {
    /// Raw status of every unhealthy pod, keyed by pod key.
    Pods(BTreeMap<String, Value>),
    /// The cluster vanished.
    Lost(&'static str),
}

impl Diagnostic {
    pub const LOST_CLUSTER: Self = Self::Lost("lost cluster");
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub activity: Activity,
    pub up: u32,
    pub down: u32,
    /// Omitted on recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

/// Everything reported for one cluster name in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Alert {
    /// `"#<old> to #<new>"`, or `"#<old> to None"` when the cluster is gone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_changed_base: Option<String>,
    /// Indices that vanished while the cluster stayed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indices_lost: Option<Vec<u32>>,
    /// Last known indices of a cluster that vanished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lost_indices: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

impl Alert {
    /// Overlay the fields set in `other`.
    pub fn merge(&mut self, other: Alert) {
        if other.index_changed_base.is_some() {
            self.index_changed_base = other.index_changed_base;
        }
        if other.indices_lost.is_some() {
            self.indices_lost = other.indices_lost;
        }
        if other.lost_indices.is_some() {
            self.lost_indices = other.lost_indices;
        }
        if other.health.is_some() {
            self.health = other.health;
        }
    }
}

/// One line of the alert log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertBatch {
    pub timestamp: DateTime<Utc>,
    /// Glob of the watcher that produced the batch.
    pub watcher: String,
    pub alerts: BTreeMap<String, Alert>,
}

impl AlertBatch {
    pub fn new(watcher: impl Into<String>, alerts: BTreeMap<String, Alert>) -> Self {
        Self {
            timestamp: Utc::now(),
            watcher: watcher.into(),
            alerts,
        }
    }
}

// ── Sinks ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("encoding alert batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination of alert batches. Shared by every watcher actor.
///
/// Watchers publish from the blocking pool, so implementations may do
/// synchronous I/O.
pub trait AlertSink: Send + Sync {
    fn publish(&self, batch: &AlertBatch) -> Result<(), SinkError>;

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Emits batches as tracing events on the `podwarden::alerts` target.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn publish(&self, batch: &AlertBatch) -> Result<(), SinkError> {
        let line = serde_json::to_string(batch)?;
        info!(target: "podwarden::alerts", watcher = %batch.watcher, alerts = %line, "alert");
        Ok(())
    }
}

/// Keeps batches in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    batches: Mutex<Vec<AlertBatch>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<AlertBatch> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AlertSink for MemoryAlertSink {
    fn publish(&self, batch: &AlertBatch) -> Result<(), SinkError> {
        let mut batches = self
            .batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        batches.push(batch.clone());
        Ok(())
    }
}

struct OpenLog {
    writer: BufWriter<File>,
    written: u64,
}

/// Appends one JSON line per batch; when the next line would push the file
/// past `max_bytes` it is rotated to `<path>.1`, shifting older backups up
/// to `<path>.<backups>`.
pub struct RotatingAlertLog {
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    log: Mutex<OpenLog>,
}

impl RotatingAlertLog {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: u32) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let log = open_append(&path)?;
        debug!(path = %path.display(), size = log.written, "alert log opened");

        Ok(Self {
            path,
            max_bytes,
            backups,
            log: Mutex::new(log),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, OpenLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn backup(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&self, log: &mut OpenLog) -> Result<(), SinkError> {
        log.writer.flush().map_err(|e| io_error(&self.path, e))?;

        if self.backups > 0 {
            for n in (1..self.backups).rev() {
                let from = self.backup(n);
                if from.exists() {
                    let to = self.backup(n + 1);
                    fs::rename(&from, &to).map_err(|e| io_error(&from, e))?;
                }
            }
            fs::rename(&self.path, self.backup(1)).map_err(|e| io_error(&self.path, e))?;
        }

        let file = File::create(&self.path).map_err(|e| io_error(&self.path, e))?;
        *log = OpenLog {
            writer: BufWriter::new(file),
            written: 0,
        };
        debug!(path = %self.path.display(), "alert log rotated");
        Ok(())
    }
}

impl AlertSink for RotatingAlertLog {
    fn publish(&self, batch: &AlertBatch) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(batch)?;
        line.push('\n');

        let mut log = self.lock();
        if log.written > 0 && log.written + line.len() as u64 > self.max_bytes {
            self.rotate(&mut log)?;
        }

        let writer = &mut log.writer;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| io_error(&self.path, e))?;
        log.written += line.len() as u64;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.lock()
            .writer
            .flush()
            .map_err(|e| io_error(&self.path, e))
    }
}

fn open_append(path: &Path) -> Result<OpenLog, SinkError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    let written = file.metadata().map_err(|e| io_error(path, e))?.len();
    Ok(OpenLog {
        writer: BufWriter::new(file),
        written,
    })
}

fn io_error(path: &Path, source: io::Error) -> SinkError {
    SinkError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(name: &str, down: u32) -> AlertBatch {
        let alert = Alert {
            health: Some(HealthReport {
                activity: Activity::Stagnant,
                up: 1,
                down,
                diagnostic: Some(Diagnostic::Pods(BTreeMap::from([(
                    format!("{name} #1"),
                    json!({ "process": "dead" }),
                )]))),
            }),
            ..Alert::default()
        };
        AlertBatch::new("*", BTreeMap::from([(name.to_string(), alert)]))
    }

    #[test]
    fn alert_serializes_only_set_fields() {
        let alert = Alert {
            indices_lost: Some(vec![2, 3]),
            ..Alert::default()
        };
        assert_eq!(serde_json::to_value(&alert).unwrap(), json!({ "indices_lost": [2, 3] }));
    }

    #[test]
    fn lost_cluster_diagnostic_is_a_plain_string() {
        let report = HealthReport {
            activity: Activity::Absent,
            up: 0,
            down: 0,
            diagnostic: Some(Diagnostic::LOST_CLUSTER),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({ "activity": "absent", "up": 0, "down": 0, "diagnostic": "lost cluster" })
        );
    }

    #[test]
    fn merge_keeps_earlier_fields() {
        let mut alert = Alert {
            index_changed_base: Some("#0 to #1".into()),
            ..Alert::default()
        };
        alert.merge(Alert {
            indices_lost: Some(vec![0]),
            ..Alert::default()
        });
        assert_eq!(alert.index_changed_base.as_deref(), Some("#0 to #1"));
        assert_eq!(alert.indices_lost, Some(vec![0]));
    }

    #[test]
    fn batch_carries_rfc3339_timestamp() {
        let value = serde_json::to_value(batch("ns.web", 1)).unwrap();
        let stamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        assert_eq!(value["alerts"]["ns.web"]["health"]["activity"], "stagnant");
    }

    #[test]
    fn log_appends_one_line_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        let log = RotatingAlertLog::open(&path, 1 << 20, 3).unwrap();

        log.publish(&batch("a", 1)).unwrap();
        log.publish(&batch("b", 2)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["alerts"]["b"]["health"]["down"], 2);
    }

    #[test]
    fn log_rotates_and_keeps_bounded_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        let line_len = serde_json::to_string(&batch("a", 1)).unwrap().len() as u64 + 1;
        let log = RotatingAlertLog::open(&path, line_len + 1, 2).unwrap();

        for _ in 0..5 {
            log.publish(&batch("a", 1)).unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
        assert!(log.backup(1).exists());
        assert!(log.backup(2).exists());
        assert!(!log.backup(3).exists());
    }

    #[test]
    fn reopened_log_counts_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alerts.log");
        let line_len = serde_json::to_string(&batch("a", 1)).unwrap().len() as u64 + 1;

        RotatingAlertLog::open(&path, line_len + 1, 1)
            .unwrap()
            .publish(&batch("a", 1))
            .unwrap();
        let log = RotatingAlertLog::open(&path, line_len + 1, 1).unwrap();
        log.publish(&batch("a", 1)).unwrap();

        assert!(log.backup(1).exists());
        assert_eq!(fs::read_to_string(log.path()).unwrap().lines().count(), 1);
    }

    #[test]
    fn memory_sink_records_batches() {
        let sink = MemoryAlertSink::new();
        sink.publish(&batch("a", 1)).unwrap();
        assert!(sink.flush().is_ok());
        assert_eq!(sink.batches().len(), 1);
    }
}
