//! podwarden-api — admin surface of the autoscale daemon.
//!
//! Every route addresses the live actors whose cluster glob matches the
//! `{pattern}` segment (shell-style: `*`, `?`, `[...]`).
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/reset/{pattern}` | Clear controller memory |
//! | POST | `/stop/{pattern}` | Stop scheduling cycles |
//! | POST | `/update/{pattern}` | Merge form fields into tunables, resume if stopped |
//! | GET | `/retrieve/{pattern}` | Tunables and state, `null` for actors that did not answer |
//!
//! Responses are always `{"success": bool, "message": ...}`.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use podwarden_actor::ActorSet;

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub actors: Arc<ActorSet>,
}

/// Build the admin router.
pub fn build_router(actors: Arc<ActorSet>) -> Router {
    Router::new()
        .route("/reset/{pattern}", post(handlers::reset))
        .route("/stop/{pattern}", post(handlers::stop))
        .route("/update/{pattern}", post(handlers::update))
        .route("/retrieve/{pattern}", get(handlers::retrieve))
        .with_state(AdminState { actors })
}
