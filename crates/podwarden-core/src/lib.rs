//! podwarden-core — shared vocabulary for the podwarden agents.
//!
//! Every agent talks to the portal about the same things: pods addressed as
//! `<cluster> #<index>`, their process status, and per-pod metrics. This
//! crate holds those types, the parser that turns a portal `grep`/`poll`
//! payload into a [`ClusterSnapshot`], the fnmatch-style [`ClusterPattern`]
//! used to address clusters, and the `podwarden.toml` configuration model.

pub mod config;
pub mod error;
pub mod pattern;
pub mod types;

pub use config::PodwardenConfig;
pub use error::{ConfigError, PatternError, SnapshotError};
pub use pattern::ClusterPattern;
pub use types::*;
