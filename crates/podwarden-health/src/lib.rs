//! podwarden-health — cluster stability watcher.
//!
//! The watcher samples its glob `checks + 1` times per cycle and feeds each
//! sample to a [`HealthBook`], which classifies every cluster base name it
//! sees and tracks its pod indices.
//!
//! # Classification
//!
//! ```text
//! first sighting                      → active     (remaining = checks)
//! down == 0, up unchanged             → stable
//! down == 0                           → active     (remaining = checks)
//! some down, up or down changed       → fluctuating
//! some down, nothing changed          → stagnant   (remaining -= 1)
//! known name missing from the sample  → absent     (records dropped)
//! ```
//!
//! # Alerting
//!
//! Alerts are edge-triggered: a stagnant cluster is reported once when it
//! runs out of checks, a fluctuating one on every cycle, and a recovery
//! once. All alerts of a cycle are merged per name and published as one
//! [`AlertBatch`] line through an [`AlertSink`], usually the size-bounded
//! [`RotatingAlertLog`].

pub mod alerts;
pub mod book;
pub mod watcher;

pub use alerts::{
    Alert, AlertBatch, AlertSink, Diagnostic, HealthReport, MemoryAlertSink, RotatingAlertLog,
    SinkError, TracingAlertSink,
};
pub use book::{Activity, HealthBook, HealthRecord};
pub use watcher::{WatchTunables, WatcherPolicy};
