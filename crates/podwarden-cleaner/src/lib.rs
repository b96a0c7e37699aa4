//! podwarden-cleaner — reconciliation of dead and stopped pods.
//!
//! Each cycle samples the cluster twice, `wait` seconds apart, and only
//! acts on pods found in the same bad state both times:
//!
//! ```text
//! S1 = grep   dead1, stopped1
//! sleep(wait)
//! S2 = grep   dead2, stopped2
//! kill  (dead1 ∩ dead2)        verify none survive
//! reset (stopped1 ∩ stopped2)  verify ok
//! ```
//!
//! A pod that flaps between samples is left alone until it settles.

pub mod reconcile;

pub use reconcile::{CleanTunables, CleanerPolicy};
