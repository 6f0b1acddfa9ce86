//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `"CTK_DATABASE_URL"`). The
//! service calls [`resolve_database_url`] once at startup and passes the
//! result into the store constructor.
//!
//! `Debug` output redacts values; error messages name the env var, never
//! its contents.

use anyhow::{bail, Result};

use crate::{StoreBackend, StoreConfig};

/// Database URL resolved from the environment. **Redacted in `Debug`.**
#[derive(Clone)]
pub struct ResolvedDatabaseUrl {
    pub env_var: String,
    url: String,
}

impl ResolvedDatabaseUrl {
    pub fn expose(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for ResolvedDatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDatabaseUrl")
            .field("env_var", &self.env_var)
            .field("url", &"<REDACTED>")
            .finish()
    }
}

/// Resolve the database URL for `store` using the process environment.
///
/// Returns `Ok(None)` for backends that need no URL.
pub fn resolve_database_url(store: &StoreConfig) -> Result<Option<ResolvedDatabaseUrl>> {
    resolve_database_url_with(store, |k| std::env::var(k).ok())
}

/// As [`resolve_database_url`], with an injectable env lookup for tests.
pub fn resolve_database_url_with<F>(
    store: &StoreConfig,
    lookup: F,
) -> Result<Option<ResolvedDatabaseUrl>>
where
    F: Fn(&str) -> Option<String>,
{
    if store.backend != StoreBackend::Postgres {
        return Ok(None);
    }

    let var = store.database_url_env.trim();
    match lookup(var) {
        Some(url) if !url.trim().is_empty() => Ok(Some(ResolvedDatabaseUrl {
            env_var: var.to_string(),
            url,
        })),
        _ => bail!("SECRET_MISSING: env var {var} is required for the postgres backend"),
    }
}
