//! Shared runtime state for ctk-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; background tasks get the same `Arc`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ctk_db::{DispatchChange, DispatchStore, StoreError};
use ctk_reconcile::{MirrorWrite, ReconcileReport};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::sync;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    SweepCompleted(SweepOutcome),
    MirrorCorrected {
        collection: String,
        id: String,
        status: String,
    },
    ReactiveFailed {
        collection: String,
        id: String,
        before: Option<String>,
        after: Option<String>,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Sync bookkeeping
// ---------------------------------------------------------------------------

/// What started a sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepTrigger {
    Http,
    Periodic,
}

impl SweepTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepTrigger::Http => "http",
            SweepTrigger::Periodic => "periodic",
        }
    }
}

/// Result of the most recent sweep, as surfaced by GET /v1/status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub trigger: String,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub report: Option<ReconcileReport>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sweep: Option<SweepOutcome>,
    pub sweeps_run: u64,
    pub reactive_corrections: u64,
    /// Reactive writes that failed. These are only recoverable by a later sweep.
    pub reactive_failures: u64,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Process-wide store handle, constructed once at startup.
    pub store: Arc<dyn DispatchStore>,
    /// Collection holding dispatch records.
    pub collection: String,
    pub sync: Arc<RwLock<SyncStatus>>,
}

impl AppState {
    pub fn new(store: Arc<dyn DispatchStore>, collection: impl Into<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        Self {
            bus,
            build: BuildInfo {
                service: "ctk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            collection: collection.into(),
            sync: Arc::new(RwLock::new(SyncStatus::default())),
        }
    }

    /// Run one bulk sweep and record its outcome.
    pub async fn run_sweep(&self, trigger: SweepTrigger) -> Result<ReconcileReport, StoreError> {
        let result = sync::run_sweep(self.store.as_ref(), &self.collection).await;

        let outcome = match &result {
            Ok(report) => SweepOutcome {
                trigger: trigger.as_str().to_string(),
                finished_at: Utc::now(),
                ok: true,
                report: Some(*report),
                error: None,
            },
            Err(e) => {
                error!(trigger = trigger.as_str(), error = %e, "dispatch status sweep failed");
                SweepOutcome {
                    trigger: trigger.as_str().to_string(),
                    finished_at: Utc::now(),
                    ok: false,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        };

        {
            let mut s = self.sync.write().await;
            s.sweeps_run += 1;
            s.last_sweep = Some(outcome.clone());
        }
        let _ = self.bus.send(BusMsg::SweepCompleted(outcome));

        result
    }

    pub async fn record_correction(&self, collection: &str, write: &MirrorWrite) {
        self.sync.write().await.reactive_corrections += 1;
        let _ = self.bus.send(BusMsg::MirrorCorrected {
            collection: collection.to_string(),
            id: write.id.clone(),
            status: write.value.status.clone(),
        });
    }

    pub async fn record_reactive_failure(&self, change: &DispatchChange, err: &StoreError) {
        self.sync.write().await.reactive_failures += 1;
        let _ = self.bus.send(BusMsg::ReactiveFailed {
            collection: change.collection.clone(),
            id: change.id.clone(),
            before: change.before.status.clone(),
            after: change.after.status.clone(),
            error: err.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    })
}

/// Spawn the periodic sweep backstop.
///
/// The first tick fires immediately, so a freshly started daemon sweeps once
/// at boot. A failed sweep is logged and retried on the next tick.
pub fn spawn_periodic_sweep(state: Arc<AppState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            collection = %state.collection,
            interval_secs = interval.as_secs(),
            "periodic sweep enabled"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            // Failure already logged and recorded by run_sweep.
            let _ = state.run_sweep(SweepTrigger::Periodic).await;
        }
    })
}
