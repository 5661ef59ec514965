//! Health endpoint.

use crate::server::ParleyRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record process start time. Call once at startup, uptime reads zero
/// until then.
pub fn init_start_time() {
    let _ = START_TIME.set(Instant::now());
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Always "ok" when the server can answer at all.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Live client connections.
    pub connections: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
}

/// GET /health
pub async fn health(Extension(relay): Extension<Arc<ParleyRelay>>) -> Json<HealthStatus> {
    let uptime_secs = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs,
        connections: relay.registry().connection_count(),
        channels: relay.registry().channel_count(),
    })
}
