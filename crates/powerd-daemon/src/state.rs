//! Shared daemon state

use chrono::{DateTime, Utc};
use powerd_core::Mirror;
use std::sync::Arc;
use tokio::sync::RwLock;

/// State shared between the admin handlers and the reconcile loop
pub struct AppState {
    /// In-memory subsystem and power supply mirror
    pub mirror: Arc<RwLock<Mirror>>,
    /// When this daemon instance started
    pub started: DateTime<Utc>,
}

impl AppState {
    pub fn new(mirror: Arc<RwLock<Mirror>>) -> Self {
        Self {
            mirror,
            started: Utc::now(),
        }
    }
}
