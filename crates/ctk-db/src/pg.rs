//! Postgres [`DispatchStore`].
//!
//! Records live in `dispatch_records` (see `migrations/`). The mirror is a
//! `jsonb` column shaped like the app's `currentStatus` object. A row trigger
//! publishes every update on [`CHANGE_CHANNEL`]; [`PgStore::spawn_change_listener`]
//! forwards those notifications into the in-process change feed.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ctk_reconcile::{DispatchRecord, MirrorWrite, StatusMirror};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{DispatchChange, DispatchStore, StoreError, CHANGE_FEED_CAPACITY};

/// NOTIFY channel the `dispatch_records` update trigger publishes on.
pub const CHANGE_CHANNEL: &str = "dispatch_changes";

const MIRROR_UPDATE_SQL: &str = r#"
    update dispatch_records
    set current_status = jsonb_build_object(
            'status', $3::text,
            'updatedAt', to_jsonb(coalesce($4::timestamptz, now()))
        )
    where collection = $1 and id = $2
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<DispatchChange>,
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded SQLx migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("db migrate failed")?;
        Ok(())
    }

    /// Create or replace a record. Replacing an existing row fires the update trigger.
    pub async fn upsert(&self, collection: &str, record: &DispatchRecord) -> Result<()> {
        let mirror = record
            .current_status
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("mirror serialize failed")?;

        sqlx::query(
            r#"
            insert into dispatch_records (collection, id, status, current_status, updated_at)
            values ($1, $2, $3, $4, $5)
            on conflict (collection, id) do update
            set status = excluded.status,
                current_status = excluded.current_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(&record.id)
        .bind(&record.status)
        .bind(mirror)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("upsert dispatch record failed")?;

        Ok(())
    }

    pub async fn fetch(&self, collection: &str, id: &str) -> Result<Option<DispatchRecord>> {
        let row = sqlx::query(
            r#"
            select id, status, current_status, updated_at
            from dispatch_records
            where collection = $1 and id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch dispatch record failed")?;

        row.as_ref()
            .map(decode_row)
            .transpose()
            .map_err(anyhow::Error::new)
    }

    /// Forward `dispatch_changes` notifications into the change feed.
    ///
    /// `PgListener` reconnects on its own after a dropped connection; updates
    /// published while disconnected are lost and left to the next sweep.
    pub fn spawn_change_listener(&self) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let tx = self.changes.clone();

        tokio::spawn(async move {
            let mut listener = loop {
                match connect_listener(&pool).await {
                    Ok(l) => break l,
                    Err(e) => {
                        error!(error = %e, "change listener connect failed; retrying");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            };
            info!(channel = CHANGE_CHANNEL, "listening for dispatch changes");

            loop {
                match listener.recv().await {
                    Ok(n) => match serde_json::from_str::<DispatchChange>(n.payload()) {
                        Ok(change) => {
                            debug!(collection = %change.collection, id = %change.id, "dispatch change");
                            let _ = tx.send(change);
                        }
                        Err(e) => warn!(error = %e, "undecodable dispatch change payload"),
                    },
                    Err(e) => {
                        error!(error = %e, "change listener recv failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }
}

async fn connect_listener(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

fn decode_row(row: &PgRow) -> Result<DispatchRecord, StoreError> {
    let mirror: Option<Value> = row.try_get("current_status")?;
    let current_status = mirror
        .filter(|v| !v.is_null())
        .as_ref()
        .map(StatusMirror::from_json);
    let updated_at: Option<DateTime<Utc>> = row.try_get("updated_at")?;

    Ok(DispatchRecord {
        id: row.try_get("id")?,
        status: row.try_get("status")?,
        current_status,
        updated_at,
    })
}

fn mirror_update<'q>(
    collection: &'q str,
    write: &'q MirrorWrite,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(MIRROR_UPDATE_SQL)
        .bind(collection)
        .bind(&write.id)
        .bind(&write.value.status)
        .bind(write.value.updated_at.explicit())
}

#[async_trait::async_trait]
impl DispatchStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn list(&self, collection: &str) -> Result<Vec<DispatchRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            select id, status, current_status, updated_at
            from dispatch_records
            where collection = $1
            order by id
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn commit_mirrors(
        &self,
        collection: &str,
        writes: &[MirrorWrite],
    ) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for w in writes {
            let res = mirror_update(collection, w).execute(&mut *tx).await?;
            if res.rows_affected() != 1 {
                // Dropping `tx` rolls back every write made so far.
                return Err(StoreError::not_found(collection, &w.id));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_mirror(&self, collection: &str, write: &MirrorWrite) -> Result<(), StoreError> {
        let res = mirror_update(collection, write).execute(&self.pool).await?;
        if res.rows_affected() != 1 {
            return Err(StoreError::not_found(collection, &write.id));
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<DispatchChange> {
        self.changes.subscribe()
    }
}
