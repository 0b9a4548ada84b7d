//! Process-wide pool registry: one pooled connection set per physical target.
//!
//! Pools are created lazily on first use. Concurrent first access for the same
//! key shares a single connect attempt; a failed attempt leaves the slot empty
//! so the next caller retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::sync::OnceCell;

use crate::PoolConfig;
use vigil_ledger_core::{LedgerError, LedgerResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PoolKey {
    url: String,
    pool: PoolConfig,
}

type PoolSlot = Arc<OnceCell<DatabaseConnection>>;

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    pools: Arc<Mutex<HashMap<PoolKey, PoolSlot>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_connect(
        &self,
        url: &str,
        pool: Option<&PoolConfig>,
    ) -> LedgerResult<DatabaseConnection> {
        let key = PoolKey {
            url: url.to_string(),
            pool: pool.cloned().unwrap_or_default(),
        };
        let slot = {
            let mut guard = self
                .pools
                .lock()
                .map_err(|_| LedgerError::storage("pool registry poisoned"))?;
            guard.entry(key.clone()).or_default().clone()
        };
        let conn = slot
            .get_or_try_init(|| async {
                debug!("registry: opening pool for {}", redact(&key.url));
                let conn = Database::connect(connect_options(&key.url, &key.pool)).await?;
                Ok::<_, LedgerError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    /// Number of pools that finished connecting.
    pub fn len(&self) -> usize {
        self.pools
            .lock()
            .map(|guard| guard.values().filter(|slot| slot.initialized()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and forgets every pool. Later calls reconnect from scratch.
    pub async fn close_all(&self) -> LedgerResult<()> {
        let slots: Vec<(PoolKey, PoolSlot)> = {
            let mut guard = self
                .pools
                .lock()
                .map_err(|_| LedgerError::storage("pool registry poisoned"))?;
            guard.drain().collect()
        };
        for (key, slot) in slots {
            if let Some(conn) = slot.get() {
                conn.clone().close().await?;
                info!("registry: closed pool for {}", redact(&key.url));
            }
        }
        Ok(())
    }
}

pub(crate) fn connect_options(url: &str, pool: &PoolConfig) -> ConnectOptions {
    let mut options = ConnectOptions::new(url.to_string());
    if let Some(max) = pool.max_connections {
        options.max_connections(max);
    }
    if let Some(min) = pool.min_connections {
        options.min_connections(min);
    }
    if let Some(timeout_ms) = pool.connect_timeout_ms {
        options.connect_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(timeout_ms) = pool.acquire_timeout_ms {
        options.acquire_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(timeout_ms) = pool.idle_timeout_ms {
        options.idle_timeout(Duration::from_millis(timeout_ms));
    }
    options.sqlx_logging(false);
    options
}

/// Drops credentials from a connection url before it reaches a log line.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
