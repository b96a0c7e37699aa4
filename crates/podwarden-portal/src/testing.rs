//! Scripted bridge for tests.
//!
//! Replies are queued per command prefix (`"grep"`, `"kill a.b*"`, ...).
//! The longest registered prefix matching a command wins. Queued replies
//! are consumed in order and the last one stays in place, so a single
//! `push` answers every later call too. Every command is recorded.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::bridge::{BridgeError, BridgeResult, PortalReply, RemoteBridge};

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(PortalReply),
    /// Transport failure.
    Fail(String),
    /// Never answers.
    Hang,
}

#[derive(Default)]
struct Inner {
    scripts: BTreeMap<String, VecDeque<Scripted>>,
    log: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedBridge {
    inner: Mutex<Inner>,
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, prefix: &str, reply: Scripted) {
        let mut inner = self.lock();
        inner
            .scripts
            .entry(prefix.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push(&self, prefix: &str, reply: PortalReply) {
        self.script(prefix, Scripted::Reply(reply));
    }

    /// Queue an `ok=true` reply whose `out` is `out` encoded as JSON.
    pub fn push_ok(&self, prefix: &str, out: &impl Serialize) {
        let out = serde_json::to_string(out).unwrap_or_default();
        self.push(prefix, PortalReply::ok(out));
    }

    pub fn push_rejected(&self, prefix: &str) {
        self.push(prefix, PortalReply::failed("refused"));
    }

    pub fn push_failure(&self, prefix: &str) {
        self.script(prefix, Scripted::Fail("connection refused".to_string()));
    }

    pub fn hang(&self, prefix: &str) {
        self.script(prefix, Scripted::Hang);
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Commands received so far that start with `prefix`.
    pub fn commands_starting(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the commands from others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_for(&self, command: &str) -> Option<Scripted> {
        let mut inner = self.lock();
        inner.log.push(command.to_string());

        let prefix = inner
            .scripts
            .keys()
            .filter(|p| command.starts_with(p.as_str()))
            .max_by_key(|p| p.len())?
            .clone();

        let queue = inner.scripts.get_mut(&prefix)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteBridge for ScriptedBridge {
    async fn execute(&self, command: &str) -> BridgeResult<PortalReply> {
        match self.next_for(command) {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(reason)) => Err(BridgeError::Transport {
                portal: "scripted".to_string(),
                reason,
            }),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(BridgeError::Transport {
                portal: "scripted".to_string(),
                reason: format!("no script for `{command}`"),
            }),
        }
    }
}
