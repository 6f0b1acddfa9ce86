use crate::{
    DispatchRecord, MirrorTimestamp, MirrorValue, MirrorWrite, ReconcileDecision, SweepPlan,
};

/// Coarse classification of a single record, used for logging and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordClass {
    InSync,
    Stale,
    /// No primary status; the record cannot be reconciled.
    Malformed,
}

/// Decide whether `record`'s mirror is stale and, if so, what it should become.
///
/// - missing primary status => `NoOp`
/// - absent mirror, or mirror status != primary status => `Correct`
/// - otherwise => `NoOp`
///
/// The corrected mirror carries the record's own `updated_at` when present,
/// else the server-timestamp sentinel.
pub fn evaluate(record: &DispatchRecord) -> ReconcileDecision {
    let Some(status) = record.status.as_deref() else {
        return ReconcileDecision::NoOp;
    };

    if record.mirror_status() == Some(status) {
        return ReconcileDecision::NoOp;
    }

    let updated_at = match record.updated_at {
        Some(at) => MirrorTimestamp::At(at),
        None => MirrorTimestamp::ServerTimestamp,
    };

    ReconcileDecision::Correct(MirrorValue {
        status: status.to_string(),
        updated_at,
    })
}

pub fn classify(record: &DispatchRecord) -> RecordClass {
    if record.status.is_none() {
        return RecordClass::Malformed;
    }
    match evaluate(record) {
        ReconcileDecision::NoOp => RecordClass::InSync,
        ReconcileDecision::Correct(_) => RecordClass::Stale,
    }
}

/// Plan a bulk sweep: one corrective write per stale record.
///
/// Writes keep input order. The caller commits them as a single batch.
pub fn reconcile_all<'a, I>(records: I) -> SweepPlan
where
    I: IntoIterator<Item = &'a DispatchRecord>,
{
    let mut plan = SweepPlan::default();

    for record in records {
        plan.report.total_checked += 1;

        if record.status.is_none() {
            plan.report.skipped += 1;
            continue;
        }

        if let ReconcileDecision::Correct(value) = evaluate(record) {
            plan.writes.push(MirrorWrite {
                id: record.id.clone(),
                value,
            });
        }
    }

    plan.report.updated = plan.writes.len();
    plan
}
