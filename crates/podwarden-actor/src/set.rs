//! The set of actors one agent process runs, addressed by cluster pattern.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use podwarden_core::ClusterPattern;

use crate::actor::{ActorHandle, ActorState};
use crate::error::{ActorError, ActorResult};
use crate::policy::Fields;

/// Per-actor outcome of a fire-and-confirm admin command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Done,
    NoResponse,
    Rejected { reason: String },
    Gone,
}

impl From<ActorResult<()>> for Delivery {
    fn from(result: ActorResult<()>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(ActorError::NoResponse(_)) => Self::NoResponse,
            Err(ActorError::Closed(_)) => Self::Gone,
            Err(ActorError::Rejected { source, .. }) => Self::Rejected {
                reason: source.to_string(),
            },
        }
    }
}

/// Handles of all running actors plus their tasks.
#[derive(Default)]
pub struct ActorSet {
    handles: Vec<ActorHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ActorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ActorHandle, task: JoinHandle<()>) {
        self.handles.push(handle);
        self.tasks.get_mut().push(task);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clusters(&self) -> Vec<&str> {
        self.handles.iter().map(ActorHandle::cluster).collect()
    }

    /// Actors whose cluster glob matches `pattern`.
    pub fn matching<'a>(&'a self, pattern: &'a ClusterPattern) -> impl Iterator<Item = &'a ActorHandle> {
        self.handles.iter().filter(|h| pattern.matches(h.cluster()))
    }

    pub async fn update(&self, pattern: &ClusterPattern, fields: &Fields) -> BTreeMap<String, Delivery> {
        let asks = self
            .matching(pattern)
            .map(|h| async move { (h.cluster().to_string(), Delivery::from(h.update(fields.clone()).await)) });
        join_all(asks).await.into_iter().collect()
    }

    pub async fn stop(&self, pattern: &ClusterPattern) -> BTreeMap<String, Delivery> {
        let asks = self
            .matching(pattern)
            .map(|h| async move { (h.cluster().to_string(), Delivery::from(h.stop().await)) });
        join_all(asks).await.into_iter().collect()
    }

    pub async fn reset(&self, pattern: &ClusterPattern) -> BTreeMap<String, Delivery> {
        let asks = self
            .matching(pattern)
            .map(|h| async move { (h.cluster().to_string(), Delivery::from(h.reset().await)) });
        join_all(asks).await.into_iter().collect()
    }

    /// State of every matching actor; `None` for actors that did not answer.
    pub async fn retrieve(&self, pattern: &ClusterPattern) -> BTreeMap<String, Option<ActorState>> {
        let asks = self.matching(pattern).map(|h| async move {
            let state = match h.retrieve().await {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(cluster = h.cluster(), error = %e, "retrieve failed");
                    None
                }
            };
            (h.cluster().to_string(), state)
        });
        join_all(asks).await.into_iter().collect()
    }

    /// Ask every actor to exit, wait up to `grace` for all of them
    /// together, then abort the stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        for handle in &self.handles {
            handle.shutdown();
        }

        let mut tasks = self.tasks.lock().await;
        let waits = self.handles.iter().zip(tasks.drain(..)).map(|(handle, mut task)| async move {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(cluster = handle.cluster(), "actor did not exit in time, aborting");
                task.abort();
            }
        });
        join_all(waits).await;
        info!(actors = self.handles.len(), "all actors shut down");
    }
}
