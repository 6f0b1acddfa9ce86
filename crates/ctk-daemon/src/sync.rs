//! Sweep and reactive correction, shared by every entry point.
//!
//! Both paths decide through `ctk_reconcile`; this module only performs the
//! store round trips and logs what it did.

use ctk_db::{DispatchChange, DispatchStore, StoreError};
use ctk_reconcile::{
    classify, on_status_change, reconcile_all, MirrorWrite, ReconcileReport, RecordClass,
};
use tracing::{info, warn};

/// Bulk sweep: one read of `collection`, at most one batched write.
///
/// A failed commit applies nothing; the caller reports the error and the
/// sweep must be re-triggered.
pub async fn run_sweep(
    store: &dyn DispatchStore,
    collection: &str,
) -> Result<ReconcileReport, StoreError> {
    info!(collection, "starting dispatch status synchronization");

    let records = store.list(collection).await?;

    for r in &records {
        match classify(r) {
            RecordClass::Stale => info!(
                id = %r.id,
                status = ?r.status,
                mirror = ?r.mirror_status(),
                "syncing dispatch: status != currentStatus"
            ),
            RecordClass::Malformed => warn!(id = %r.id, "dispatch has no status; skipped"),
            RecordClass::InSync => {}
        }
    }

    let plan = reconcile_all(&records);

    if plan.is_empty() {
        info!(
            collection,
            total_checked = plan.report.total_checked,
            "no synchronization needed; all statuses in sync"
        );
    } else {
        store.commit_mirrors(collection, &plan.writes).await?;
        info!(
            collection,
            total_checked = plan.report.total_checked,
            updated = plan.report.updated,
            "synchronized dispatch statuses"
        );
    }

    Ok(plan.report)
}

/// Reactive correction for one update event.
///
/// Returns the write that was applied, or `None` when the update needs none.
pub async fn handle_change(
    store: &dyn DispatchStore,
    change: &DispatchChange,
) -> Result<Option<MirrorWrite>, StoreError> {
    let Some(value) = on_status_change(&change.before, &change.after).into_correction() else {
        return Ok(None);
    };

    info!(
        id = %change.id,
        before = ?change.before.status,
        after = ?change.after.status,
        mirror = ?change.after.mirror_status(),
        "auto-syncing status mirror"
    );

    let write = MirrorWrite {
        id: change.id.clone(),
        value,
    };
    store.write_mirror(&change.collection, &write).await?;

    info!(id = %write.id, status = %write.value.status, "status mirror synced");
    Ok(Some(write))
}
