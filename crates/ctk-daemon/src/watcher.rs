//! Reactive status watcher.
//!
//! Consumes the store's change feed and issues a single-record mirror write
//! whenever a dispatch's primary status changes and its mirror is stale.
//! Failures are logged and dropped; the sweep is the backstop.

use std::sync::Arc;

use ctk_db::DispatchChange;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{state::AppState, sync};

/// Spawn the watcher. The feed is subscribed before this returns, so no
/// update made after the call is missed.
pub fn spawn_status_watcher(state: Arc<AppState>) -> JoinHandle<()> {
    let mut rx = state.store.changes();

    tokio::spawn(async move {
        info!(
            collection = %state.collection,
            store = state.store.backend_name(),
            "status watcher started"
        );
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if change.collection != state.collection {
                        continue;
                    }
                    process_change(&state, &change).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped,
                        "status watcher lagged; skipped updates are left to the next sweep"
                    );
                }
                Err(RecvError::Closed) => {
                    info!("change feed closed; status watcher stopping");
                    break;
                }
            }
        }
    })
}

async fn process_change(state: &AppState, change: &DispatchChange) {
    match sync::handle_change(state.store.as_ref(), change).await {
        Ok(Some(write)) => state.record_correction(&change.collection, &write).await,
        Ok(None) => {}
        Err(e) => {
            error!(
                id = %change.id,
                before = ?change.before.status,
                after = ?change.after.status,
                error = %e,
                "auto-sync of status mirror failed"
            );
            state.record_reactive_failure(change, &e).await;
        }
    }
}
