//! ctk-reconcile
//!
//! Status-mirror reconciliation for dispatch records.
//!
//! A dispatch record carries its primary `status` and a denormalized mirror
//! `currentStatus.status` used by the app's read paths. This crate decides
//! whether the mirror is stale and what the corrective write looks like.
//!
//! - Absent mirror, or mirror status != primary status => stale
//! - Missing primary status => malformed, never corrected
//! - The bulk sweep and the reactive trigger share [`evaluate`]
//!
//! Deterministic, pure logic. No IO. No store calls.

mod engine;
mod trigger;
mod types;

pub use engine::{classify, evaluate, reconcile_all, RecordClass};
pub use trigger::on_status_change;
pub use types::*;
