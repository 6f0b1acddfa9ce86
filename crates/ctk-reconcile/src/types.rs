use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Denormalized copy of the primary status (`currentStatus`), read by the
/// app's secondary views. Either subfield may be missing in stored data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMirror {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusMirror {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            updated_at: None,
        }
    }

    /// Read a stored mirror without rejecting it.
    ///
    /// A subfield of the wrong type reads as missing, and a non-object mirror
    /// reads as empty. Either way the record classifies as stale and the next
    /// correction overwrites the bad value.
    pub fn from_json(value: &Value) -> Self {
        Self {
            status: value.get("status").and_then(Value::as_str).map(str::to_owned),
            updated_at: value
                .get("updatedAt")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        }
    }
}

/// `currentStatus` deserializer: `null` is absent, anything else goes
/// through [`StatusMirror::from_json`].
fn lenient_mirror<'de, D>(deserializer: D) -> Result<Option<StatusMirror>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .filter(|v| !v.is_null())
        .map(|v| StatusMirror::from_json(&v)))
}

/// Dispatch record as stored by the rest of the application.
///
/// `status` is the source of truth. It is optional here only because stored
/// documents are not validated on write; a record without it is malformed and
/// is never corrected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_mirror")]
    pub current_status: Option<StatusMirror>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DispatchRecord {
    /// Record with a primary status and no mirror.
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Some(status.into()),
            current_status: None,
            updated_at: None,
        }
    }

    /// Record with neither a primary status nor a mirror.
    pub fn without_status(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: None,
            current_status: None,
            updated_at: None,
        }
    }

    pub fn with_mirror(mut self, mirror: StatusMirror) -> Self {
        self.current_status = Some(mirror);
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Status currently held by the mirror, if any.
    pub fn mirror_status(&self) -> Option<&str> {
        self.current_status.as_ref()?.status.as_deref()
    }
}

/// Timestamp stamped onto a corrected mirror.
///
/// `ServerTimestamp` is resolved by the store at write time, so two writes in
/// the same batch share the store's clock rather than the caller's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum MirrorTimestamp {
    At(DateTime<Utc>),
    ServerTimestamp,
}

impl MirrorTimestamp {
    /// Concrete timestamp, or `None` for the server sentinel.
    pub fn explicit(&self) -> Option<DateTime<Utc>> {
        match self {
            MirrorTimestamp::At(at) => Some(*at),
            MirrorTimestamp::ServerTimestamp => None,
        }
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.explicit().unwrap_or(now)
    }
}

impl std::fmt::Display for MirrorTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorTimestamp::At(at) => write!(f, "{}", at.to_rfc3339()),
            MirrorTimestamp::ServerTimestamp => write!(f, "<server timestamp>"),
        }
    }
}

/// Corrected mirror value produced by the reconciler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorValue {
    pub status: String,
    pub updated_at: MirrorTimestamp,
}

impl MirrorValue {
    /// Materialize the mirror, resolving a server timestamp to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> StatusMirror {
        StatusMirror {
            status: Some(self.status.clone()),
            updated_at: Some(self.updated_at.resolve(now)),
        }
    }

    /// Overwrite `record`'s mirror with this value.
    pub fn apply_to(&self, record: &mut DispatchRecord, now: DateTime<Utc>) {
        record.current_status = Some(self.resolve(now));
    }
}

/// What the caller must do for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileDecision {
    NoOp,
    Correct(MirrorValue),
}

impl ReconcileDecision {
    pub fn is_noop(&self) -> bool {
        matches!(self, ReconcileDecision::NoOp)
    }

    pub fn into_correction(self) -> Option<MirrorValue> {
        match self {
            ReconcileDecision::Correct(v) => Some(v),
            ReconcileDecision::NoOp => None,
        }
    }
}

/// One corrective write, addressed by record id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorWrite {
    pub id: String,
    pub value: MirrorValue,
}

/// Counters for one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub total_checked: usize,
    pub updated: usize,
    /// Set by the executor; planning never produces errors.
    pub errors: usize,
    /// Records skipped because they have no primary status.
    pub skipped: usize,
}

impl ReconcileReport {
    /// `true` when the sweep found nothing to correct.
    pub fn is_in_sync(&self) -> bool {
        self.updated == 0
    }
}

/// Output of [`crate::reconcile_all`]: the batch to commit plus its report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepPlan {
    pub writes: Vec<MirrorWrite>,
    pub report: ReconcileReport,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}
