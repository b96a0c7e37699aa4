//! podwarden-portal — the only way the agents reach the fleet.
//!
//! The portal accepts one command line per request (`grep`, `poll`, `kill`,
//! `reset`, `scale`) and answers with `{"ok": bool, "out": string}` where
//! `out` is itself a JSON document. This crate provides:
//!
//! ```text
//! RemoteBridge (trait)
//!   ├── PortalClient   HTTP/1 POST <portal>/shell, X-Shell: <line>
//!   └── ScriptedBridge canned replies for tests
//! commands   typed grep/poll/kill/reset/scale on top of any bridge
//! retry      retry(policy, op) combinator for transport failures
//! discover   glob -> concrete "<cluster>*" globs
//! ```
//!
//! Nothing here panics on a bad reply: an `ok=false`, a transport error or a
//! malformed body all come back as a [`BridgeError`] for the caller to log
//! and skip.

pub mod bridge;
pub mod client;
pub mod commands;
pub mod discover;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{BridgeError, BridgeResult, PortalReply, RemoteBridge};
pub use client::PortalClient;
pub use commands::{KillReport, PortalCommand, ResetReport, ScaleEntry, ScaleReport};
pub use discover::discover;
pub use retry::{retry, RetryPolicy};
