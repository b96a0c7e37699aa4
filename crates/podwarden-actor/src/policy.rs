//! The `Policy` trait: the decision logic an actor drives.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use podwarden_portal::RemoteBridge;

use crate::error::TunableError;

/// Field/value pairs of an `update` request, as posted by the admin form.
pub type Fields = BTreeMap<String, String>;

/// When the actor should start its next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// One period after the start of the cycle that just ended.
    Period,
    /// Idle (still serving commands) until the given instant.
    SpinUntil(Instant),
}

/// Decision logic for one cluster.
///
/// `cycle` may sample the portal several times and sleep between samples;
/// it runs to completion before the actor looks at its command queue
/// again, so no other method is ever called concurrently with it.
#[async_trait]
pub trait Policy: Send + 'static {
    /// Short agent name used in logs (`cleaner`, `scaler`, `watcher`).
    fn kind(&self) -> &'static str;

    /// Nominal time from one cycle start to the next.
    fn period(&self) -> Duration;

    /// Run one sample → decide → act cycle against `cluster`.
    async fn cycle(&mut self, cluster: &str, bridge: &dyn RemoteBridge) -> anyhow::Result<Next>;

    /// Merge `fields` into the tunables. Must be all-or-nothing.
    fn update(&mut self, fields: &Fields) -> Result<(), TunableError>;

    /// Clear accumulated decision memory. Scheduling is unaffected.
    fn reset(&mut self) {}

    /// Tunables and decision state for `retrieve`.
    fn snapshot(&self) -> serde_json::Value;
}
