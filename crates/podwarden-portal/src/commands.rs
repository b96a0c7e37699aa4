//! Typed portal commands.
//!
//! Each helper renders a [`PortalCommand`], sends it through a bridge,
//! treats `ok=false` as [`BridgeError::Rejected`] and decodes `out`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use podwarden_core::ClusterSnapshot;

use crate::bridge::{BridgeError, BridgeResult, RemoteBridge};

/// The command lines the agents send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalCommand<'a> {
    Grep(&'a str),
    Poll(&'a str),
    Kill { glob: &'a str, indices: &'a BTreeSet<u32> },
    Reset { glob: &'a str, indices: &'a BTreeSet<u32> },
    Scale { glob: &'a str, count: u32 },
}

impl fmt::Display for PortalCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grep(glob) => write!(f, "grep {glob} -j"),
            Self::Poll(glob) => write!(f, "poll {glob} -j"),
            Self::Kill { glob, indices } => write!(f, "kill {glob} -i {} -j", join(indices)),
            Self::Reset { glob, indices } => write!(f, "reset {glob} -i {} -j", join(indices)),
            Self::Scale { glob, count } => write!(f, "scale {glob} -f @{count} -j"),
        }
    }
}

fn join(indices: &BTreeSet<u32>) -> String {
    indices
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

async fn run(bridge: &dyn RemoteBridge, command: &PortalCommand<'_>) -> BridgeResult<String> {
    let line = command.to_string();
    let reply = bridge.execute(&line).await?;
    if !reply.ok {
        return Err(BridgeError::Rejected {
            command: line,
            out: reply.out,
        });
    }
    Ok(reply.out)
}

fn decode<T: for<'de> Deserialize<'de>>(command: &PortalCommand<'_>, out: &str) -> BridgeResult<T> {
    serde_json::from_str(out).map_err(|e| BridgeError::Malformed(format!("`{command}`: {e}")))
}

/// `grep <glob> -j`: process status of every matching pod.
pub async fn grep(bridge: &dyn RemoteBridge, glob: &str) -> BridgeResult<ClusterSnapshot> {
    let out = run(bridge, &PortalCommand::Grep(glob)).await?;
    Ok(ClusterSnapshot::from_json(&out)?)
}

/// `poll <glob> -j`: metrics of every matching pod.
pub async fn poll(bridge: &dyn RemoteBridge, glob: &str) -> BridgeResult<ClusterSnapshot> {
    let out = run(bridge, &PortalCommand::Poll(glob)).await?;
    Ok(ClusterSnapshot::from_json(&out)?)
}

// ── kill ──────────────────────────────────────────────────────────

/// Outcome of a `kill` for one glob.
#[derive(Debug, Clone, PartialEq)]
pub struct KillReport {
    /// Indices the portal reports as taken down.
    pub down: BTreeSet<u32>,
    pub raw: Value,
}

impl KillReport {
    /// Requested indices the portal did not take down.
    pub fn survivors(&self, requested: &BTreeSet<u32>) -> BTreeSet<u32> {
        requested.difference(&self.down).copied().collect()
    }
}

#[derive(Deserialize)]
struct KillEntry {
    #[serde(default)]
    down: Vec<u32>,
}

pub async fn kill(
    bridge: &dyn RemoteBridge,
    glob: &str,
    indices: &BTreeSet<u32>,
) -> BridgeResult<KillReport> {
    let command = PortalCommand::Kill { glob, indices };
    let out = run(bridge, &command).await?;
    let raw: Value = decode(&command, &out)?;
    let entry: KillEntry = entry_for(&command, &raw, glob)?;
    Ok(KillReport {
        down: entry.down.into_iter().collect(),
        raw,
    })
}

// ── reset ─────────────────────────────────────────────────────────

/// Outcome of a `reset` for one glob.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetReport {
    pub ok: bool,
    pub raw: Value,
}

#[derive(Deserialize)]
struct ResetEntry {
    ok: bool,
}

pub async fn reset(
    bridge: &dyn RemoteBridge,
    glob: &str,
    indices: &BTreeSet<u32>,
) -> BridgeResult<ResetReport> {
    let command = PortalCommand::Reset { glob, indices };
    let out = run(bridge, &command).await?;
    let raw: Value = decode(&command, &out)?;
    let entry: ResetEntry = entry_for(&command, &raw, glob)?;
    Ok(ResetReport { ok: entry.ok, raw })
}

// ── scale ─────────────────────────────────────────────────────────

/// Per-cluster result of a `scale`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScaleEntry {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub requested: u32,
}

/// Outcome of a `scale`, keyed by the clusters the glob matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleReport {
    pub clusters: BTreeMap<String, ScaleEntry>,
    pub raw: Value,
}

impl ScaleReport {
    /// True when any matched cluster reported a failure.
    pub fn failed(&self) -> bool {
        self.clusters.values().any(|entry| !entry.ok)
    }
}

pub async fn scale(bridge: &dyn RemoteBridge, glob: &str, count: u32) -> BridgeResult<ScaleReport> {
    let command = PortalCommand::Scale { glob, count };
    let out = run(bridge, &command).await?;
    let raw: Value = decode(&command, &out)?;
    let clusters = serde_json::from_value(raw.clone())
        .map_err(|e| BridgeError::Malformed(format!("`{command}`: {e}")))?;
    Ok(ScaleReport { clusters, raw })
}

fn entry_for<T: for<'de> Deserialize<'de>>(
    command: &PortalCommand<'_>,
    raw: &Value,
    glob: &str,
) -> BridgeResult<T> {
    let entry = raw.get(glob).ok_or_else(|| BridgeError::MissingKey {
        command: command.to_string(),
        key: glob.to_string(),
    })?;
    serde_json::from_value(entry.clone())
        .map_err(|e| BridgeError::Malformed(format!("`{command}`: {e}")))
}
