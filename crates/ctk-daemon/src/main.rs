//! ctk-daemon entry point.
//!
//! This file is intentionally thin: it loads config, sets up tracing, builds
//! the store and shared state, starts the background tasks, and serves HTTP.
//! Route handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use ctk_config::{secrets, ServiceConfig, StoreBackend};
use ctk_daemon::{routes, state, watcher};
use ctk_db::{DispatchStore, MemoryStore, PgStore};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = ctk_config::load_from_env().context("config load failed")?;
    let cfg = loaded.service_config()?;
    info!(config_hash = %loaded.config_hash, store = cfg.store.backend.as_str(), "config loaded");

    let store = build_store(&cfg).await?;
    let shared = Arc::new(state::AppState::new(store, cfg.sync.collection.clone()));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    if cfg.sync.watch {
        watcher::spawn_status_watcher(Arc::clone(&shared));
    } else {
        warn!("status watcher disabled; mirrors are corrected by sweeps only");
    }

    if let Some(interval) = cfg.sync.sweep_interval() {
        state::spawn_periodic_sweep(Arc::clone(&shared), interval);
    }

    let app: Router = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = bind_addr_from_env().unwrap_or(cfg.server.bind_addr);
    info!("ctk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("CTK_DAEMON_ADDR").ok()?.parse().ok()
}

/// Construct the process-wide store handle.
async fn build_store(cfg: &ServiceConfig) -> anyhow::Result<Arc<dyn DispatchStore>> {
    match cfg.store.backend {
        StoreBackend::Memory => {
            warn!("using in-memory store; records do not survive restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = secrets::resolve_database_url(&cfg.store)?
                .context("postgres backend resolved no database url")?;
            let pg = PgStore::connect(url.expose(), cfg.store.max_connections).await?;
            if cfg.store.run_migrations {
                pg.migrate().await?;
            }
            pg.spawn_change_listener();
            info!(env_var = %url.env_var, "connected to postgres");
            Ok(Arc::new(pg))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
