//! Reactive path: decide on a correction from a before/after update pair.

use crate::{evaluate, DispatchRecord, ReconcileDecision};

/// Evaluate an update event.
///
/// Only a change of the primary status can trigger a write; any other
/// update (including the mirror correction itself) yields `NoOp`, which keeps
/// the trigger from re-firing on its own writes.
pub fn on_status_change(before: &DispatchRecord, after: &DispatchRecord) -> ReconcileDecision {
    if before.status == after.status {
        return ReconcileDecision::NoOp;
    }
    evaluate(after)
}
