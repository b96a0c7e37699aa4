//! The `RemoteBridge` seam between the agents and the portal.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use podwarden_core::SnapshotError;

/// Envelope returned by the portal for every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalReply {
    pub ok: bool,
    #[serde(default)]
    pub out: String,
}

impl PortalReply {
    pub fn ok(out: impl Into<String>) -> Self {
        Self {
            ok: true,
            out: out.into(),
        }
    }

    pub fn failed(out: impl Into<String>) -> Self {
        Self {
            ok: false,
            out: out.into(),
        }
    }
}

/// Errors talking to the portal. All of them are recoverable for the
/// current cycle.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("i/o failure talking to portal {portal}: {reason}")]
    Transport { portal: String, reason: String },

    #[error("portal request timed out after {0:?}")]
    Timeout(Duration),

    #[error("command `{0}` cannot be sent as a header")]
    InvalidCommand(String),

    #[error("portal refused `{command}`: {out}")]
    Rejected { command: String, out: String },

    #[error("malformed portal response: {0}")]
    Malformed(String),

    #[error("portal response for `{command}` has no entry for `{key}`")]
    MissingKey { command: String, key: String },
}

impl BridgeError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout(_))
    }
}

impl From<SnapshotError> for BridgeError {
    fn from(e: SnapshotError) -> Self {
        Self::Malformed(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Sends one command line to the portal and returns its envelope.
///
/// Implementations must be safe to call concurrently from every actor.
#[async_trait]
pub trait RemoteBridge: Send + Sync {
    async fn execute(&self, command: &str) -> BridgeResult<PortalReply>;
}

/// Parse the first line of a portal body as a [`PortalReply`].
pub fn parse_reply(body: &str) -> BridgeResult<PortalReply> {
    let line = body.lines().next().unwrap_or_default();
    serde_json::from_str(line).map_err(|e| BridgeError::Malformed(e.to_string()))
}
