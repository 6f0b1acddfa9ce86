//! ctk-db
//!
//! Record store for dispatch documents.
//!
//! [`DispatchStore`] is the seam the sync service talks to. It covers exactly
//! what reconciliation needs: bulk listing, an atomic batch of mirror writes,
//! a single mirror write, a change feed with before/after images, and
//! server-side timestamps (resolved inside the store at write time).
//!
//! Two backends:
//! - [`MemoryStore`]: in-process, used for development and tests.
//! - [`PgStore`]: Postgres via SQLx, change feed via LISTEN/NOTIFY.

mod error;
mod memory;
mod pg;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg::{PgStore, CHANGE_CHANNEL};

use ctk_reconcile::{DispatchRecord, MirrorWrite};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Env var holding the Postgres connection URL (credentials stay out of config files).
pub const ENV_DB_URL: &str = "CTK_DATABASE_URL";

/// Capacity of the in-process change broadcast.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

/// One update to one record, as delivered by the change feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchChange {
    pub collection: String,
    pub id: String,
    pub before: DispatchRecord,
    pub after: DispatchRecord,
}

/// Store contract used by the bulk sweep and the reactive watcher.
///
/// Implementations must be `Send + Sync`; the service holds one
/// `Arc<dyn DispatchStore>` for the whole process.
#[async_trait::async_trait]
pub trait DispatchStore: Send + Sync {
    /// Short backend name for logs and health output (e.g. `"memory"`).
    fn backend_name(&self) -> &'static str;

    /// Read every record in `collection`.
    async fn list(&self, collection: &str) -> Result<Vec<DispatchRecord>, StoreError>;

    /// Apply all `writes` atomically: either every mirror is replaced or none is.
    ///
    /// An empty slice is a no-op.
    async fn commit_mirrors(&self, collection: &str, writes: &[MirrorWrite])
        -> Result<(), StoreError>;

    /// Replace a single record's mirror.
    async fn write_mirror(&self, collection: &str, write: &MirrorWrite) -> Result<(), StoreError>;

    /// Subscribe to record updates. Each call returns an independent receiver.
    fn changes(&self) -> broadcast::Receiver<DispatchChange>;
}
