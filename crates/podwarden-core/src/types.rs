//! Pod and cluster types as reported by the portal.
//!
//! The portal keys every pod as `<cluster> #<index>`, where `<cluster>` is
//! the namespace-qualified cluster name (which may itself contain ` #`).
//! A `grep` payload maps those keys to records carrying at least a
//! `process` field; a `poll` payload maps them to metric records such as
//! `{"threads": 3}`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SnapshotError;

/// Separator between the cluster name and the pod index in a pod key.
pub const INDEX_SEPARATOR: &str = " #";

// ── Pod key ───────────────────────────────────────────────────────

/// A pod address: cluster base name plus numeric index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    pub cluster: String,
    pub index: u32,
}

impl PodKey {
    pub fn new(cluster: impl Into<String>, index: u32) -> Self {
        Self {
            cluster: cluster.into(),
            index,
        }
    }

    /// Parse a portal key. Only the last ` #` splits; earlier ones belong to
    /// the cluster name.
    pub fn parse(key: &str) -> Option<Self> {
        let (cluster, index) = key.rsplit_once(INDEX_SEPARATOR)?;
        let index = index.trim().parse().ok()?;
        Some(Self::new(cluster, index))
    }

    /// Glob addressing every pod of this key's cluster.
    pub fn cluster_glob(&self) -> String {
        format!("{}*", self.cluster)
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.cluster, INDEX_SEPARATOR, self.index)
    }
}

// ── Pod record ────────────────────────────────────────────────────

/// Status of the sub-process supervised by a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Dead,
    Stopped,
    /// Anything else the portal reports (`idle`, `configuring`, ...).
    Other,
}

impl ProcessStatus {
    pub fn from_portal(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "dead" => Self::Dead,
            "stopped" => Self::Stopped,
            _ => Self::Other,
        }
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// One pod as seen in a single sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodRecord {
    pub process: ProcessStatus,
    /// Numeric fields of the record (e.g. `threads` from a `poll`).
    pub metrics: BTreeMap<String, f64>,
    /// The record exactly as the portal sent it.
    pub raw: Value,
}

impl PodRecord {
    fn from_value(key: &str, value: Value) -> Result<Self, SnapshotError> {
        let Value::Object(fields) = &value else {
            return Err(SnapshotError::BadRecord(key.to_string()));
        };

        let process = fields
            .get("process")
            .and_then(Value::as_str)
            .map(ProcessStatus::from_portal)
            .unwrap_or(ProcessStatus::Other);

        let metrics = fields
            .iter()
            .filter_map(|(name, v)| v.as_f64().map(|n| (name.clone(), n)))
            .collect();

        Ok(Self {
            process,
            metrics,
            raw: value,
        })
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Per-cluster counts derived from a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterTally {
    pub indices: BTreeSet<u32>,
    pub up: u32,
    pub down: u32,
}

/// Immutable view of a cluster (or cluster set) at one sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pods: BTreeMap<PodKey, PodRecord>,
}

impl ClusterSnapshot {
    /// Decode the `out` string of a `grep -j` or `poll -j` reply.
    pub fn from_json(out: &str) -> Result<Self, SnapshotError> {
        Self::from_value(serde_json::from_str(out)?)
    }

    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let Value::Object(entries) = value else {
            return Err(SnapshotError::NotAnObject);
        };

        let mut pods = BTreeMap::new();
        for (key, record) in entries {
            let pod = PodKey::parse(&key).ok_or_else(|| SnapshotError::BadKey(key.clone()))?;
            pods.insert(pod, PodRecord::from_value(&key, record)?);
        }
        Ok(Self { pods })
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn get(&self, key: &PodKey) -> Option<&PodRecord> {
        self.pods.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PodKey, &PodRecord)> {
        self.pods.iter()
    }

    /// Indices of pods currently in `status`.
    pub fn indices_in(&self, status: ProcessStatus) -> BTreeSet<u32> {
        self.pods
            .iter()
            .filter(|(_, record)| record.process == status)
            .map(|(key, _)| key.index)
            .collect()
    }

    pub fn count_in(&self, status: ProcessStatus) -> usize {
        self.pods.values().filter(|r| r.process == status).count()
    }

    /// Sum of `metric` over every pod that reports it.
    pub fn metric_sum(&self, metric: &str) -> f64 {
        self.pods.values().filter_map(|r| r.metric(metric)).sum()
    }

    /// Distinct cluster base names present in the snapshot.
    pub fn cluster_names(&self) -> BTreeSet<&str> {
        self.pods.keys().map(|k| k.cluster.as_str()).collect()
    }

    /// Index set and up/down counts per cluster base name. A pod is "up"
    /// only when its process is running.
    pub fn tally(&self) -> BTreeMap<String, ClusterTally> {
        let mut out: BTreeMap<String, ClusterTally> = BTreeMap::new();
        for (key, record) in &self.pods {
            let tally = out.entry(key.cluster.clone()).or_default();
            tally.indices.insert(key.index);
            if record.process.is_running() {
                tally.up += 1;
            } else {
                tally.down += 1;
            }
        }
        out
    }

    /// Raw records of the unhealthy pods of one cluster, keyed by pod key.
    pub fn unhealthy_in(&self, cluster: &str) -> BTreeMap<String, Value> {
        self.pods
            .iter()
            .filter(|(key, record)| key.cluster == cluster && !record.process.is_running())
            .map(|(key, record)| (key.to_string(), record.raw.clone()))
            .collect()
    }
}
