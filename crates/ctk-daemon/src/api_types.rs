//! Request and response types for all ctk-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use serde::{Deserialize, Serialize};

use crate::state::SyncStatus;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub store: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub collection: String,
    pub store: String,
    pub sync: SyncStatus,
}

// ---------------------------------------------------------------------------
// /v1/dispatches/sync
// ---------------------------------------------------------------------------

/// Sweep succeeded. Field names match what the mobile admin tooling reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub total_checked: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Sweep failed (store read or batch commit). Returned with HTTP 500.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
}
