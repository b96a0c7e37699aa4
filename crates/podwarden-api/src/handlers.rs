//! Admin handlers.
//!
//! Each handler compiles the pattern, addresses the matching actors and
//! reports per-cluster outcomes. A bad pattern is the only 4xx.

use std::collections::BTreeMap;

use axum::Form;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, info};

use podwarden_actor::{Delivery, Fields};
use podwarden_core::ClusterPattern;

use crate::AdminState;

/// Response wrapper shared by every route.
#[derive(Serialize)]
struct AdminResponse<T: Serialize> {
    success: bool,
    message: T,
}

fn respond<T: Serialize>(success: bool, message: T) -> Response {
    Json(AdminResponse { success, message }).into_response()
}

fn bad_pattern(pattern: &str, reason: String) -> Response {
    debug!(%pattern, %reason, "rejected admin pattern");
    (
        StatusCode::BAD_REQUEST,
        Json(AdminResponse {
            success: false,
            message: reason,
        }),
    )
        .into_response()
}

/// `success` only when every addressed actor confirmed.
fn deliveries(outcome: BTreeMap<String, Delivery>) -> Response {
    let success = outcome.values().all(|d| *d == Delivery::Done);
    respond(success, outcome)
}

/// POST /reset/{pattern}
pub async fn reset(State(state): State<AdminState>, Path(pattern): Path<String>) -> Response {
    let glob = match ClusterPattern::new(&pattern) {
        Ok(glob) => glob,
        Err(e) => return bad_pattern(&pattern, e.to_string()),
    };
    let outcome = state.actors.reset(&glob).await;
    info!(%pattern, actors = outcome.len(), "reset requested");
    deliveries(outcome)
}

/// POST /stop/{pattern}
pub async fn stop(State(state): State<AdminState>, Path(pattern): Path<String>) -> Response {
    let glob = match ClusterPattern::new(&pattern) {
        Ok(glob) => glob,
        Err(e) => return bad_pattern(&pattern, e.to_string()),
    };
    let outcome = state.actors.stop(&glob).await;
    info!(%pattern, actors = outcome.len(), "stop requested");
    deliveries(outcome)
}

/// POST /update/{pattern}, form body `field=value&...`
pub async fn update(
    State(state): State<AdminState>,
    Path(pattern): Path<String>,
    Form(fields): Form<Fields>,
) -> Response {
    let glob = match ClusterPattern::new(&pattern) {
        Ok(glob) => glob,
        Err(e) => return bad_pattern(&pattern, e.to_string()),
    };
    let outcome = state.actors.update(&glob, &fields).await;
    info!(
        %pattern,
        actors = outcome.len(),
        fields = ?fields.keys().collect::<Vec<_>>(),
        "update requested"
    );
    deliveries(outcome)
}

/// GET /retrieve/{pattern}
pub async fn retrieve(State(state): State<AdminState>, Path(pattern): Path<String>) -> impl IntoResponse {
    let glob = match ClusterPattern::new(&pattern) {
        Ok(glob) => glob,
        Err(e) => return bad_pattern(&pattern, e.to_string()),
    };
    respond(true, state.actors.retrieve(&glob).await)
}
