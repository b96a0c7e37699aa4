//! podwarden-actor — the control loop shared by every agent.
//!
//! One actor owns one concrete cluster glob and one [`Policy`]. It runs on
//! its own tokio task and processes one thing at a time: either a cycle of
//! its policy or one admin command. Commands that arrive during a cycle
//! wait in the channel until the cycle is over.
//!
//! ```text
//!             ┌──────────── select! ────────────┐
//! ActorHandle │ cmd = rx.recv()   → handle cmd  │
//!   (mpsc) ──▶│ sleep_until(wake) → run cycle,  │
//!             │                     next wake   │
//!             └─────────────────────────────────┘
//! ```
//!
//! The next wake is `cycle start + period` unless the policy asks to spin
//! until a specific instant. A stopped actor has no wake and only serves
//! commands. Errors and panics in a cycle are logged and never end the
//! loop.
//!
//! Admin asks (`update`, `stop`, `reset`, `retrieve`) carry a oneshot reply
//! and are bounded by a timeout, so a caller never waits on an actor stuck
//! in a portal call.

pub mod actor;
pub mod error;
pub mod policy;
pub mod set;
pub mod tunables;

pub use actor::{spawn, ActorHandle, ActorState, Schedule, ASK_TIMEOUT};
pub use error::{ActorError, ActorResult, TunableError};
pub use policy::{Fields, Next, Policy};
pub use set::{ActorSet, Delivery};
