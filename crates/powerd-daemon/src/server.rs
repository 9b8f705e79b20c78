//! Admin server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::admin;
use crate::state::AppState;

/// Run the admin HTTP server. A bind failure is fatal.
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = Router::new()
        .route("/admin/dump", get(admin::dump))
        .route("/admin/test", post(admin::set_test_override))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "starting admin server");
    axum::serve(listener, app).await?;
    Ok(())
}
