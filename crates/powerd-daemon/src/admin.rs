//! Admin endpoint handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use powerd_core::PsuStatus;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Diagnostic dump of the in-memory mirror
pub async fn dump(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mirror = state.mirror.read().await;

    let mut out = String::new();
    let _ = writeln!(out, "powerd {} (started {})", env!("CARGO_PKG_VERSION"), state.started);

    let mut subsystems: Vec<_> = mirror.subsystems().collect();
    subsystems.sort_by(|a, b| a.name.cmp(&b.name));

    for subsystem in subsystems {
        let _ = writeln!(
            out,
            "subsystem {}: {} supplies, led {}",
            subsystem.name,
            subsystem.psus.len(),
            subsystem
                .led
                .as_ref()
                .map_or("none".to_string(), |_| subsystem.led_status.to_string()),
        );
        for psu in &subsystem.psus {
            let _ = writeln!(
                out,
                "  {}: status {} override {} last change {}",
                psu.name,
                psu.status,
                psu.test_override
                    .map_or("none".to_string(), |s| s.to_string()),
                psu.last_change,
            );
        }
    }

    out
}

/// Manual override request body
#[derive(Deserialize)]
pub struct TestRequest {
    /// Power supply name, e.g. `psu-1`
    pub psu: String,
    /// Status token, or `none` to clear the override
    pub state: String,
}

/// Set or clear a power supply's test override
pub async fn set_test_override(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TestRequest>,
) -> impl IntoResponse {
    let value = PsuStatus::parse_override(&req.state);

    let mut mirror = state.mirror.write().await;
    if !mirror.set_test_override(&req.psu, value) {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("power supply does not exist")),
        )
            .into_response();
    }

    info!(psu = %req.psu, state = %req.state, "test override set");

    Json(serde_json::json!({
        "psu": req.psu,
        "override": value.map_or("none".to_string(), |s| s.to_string()),
    }))
    .into_response()
}
