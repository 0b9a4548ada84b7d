//! Cooperative mutual exclusion keyed by an application-chosen string.
//!
//! Keys hash to a stable 64-bit value so every process agrees on the lock id.
//! Postgres advisory locks back both scopes; SQLite already serialises writers
//! behind its database lock, so the helpers succeed without doing anything.
//! A dropped [`SessionLock`] is released on a background task.

use log::{debug, error, warn};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, Statement,
    TransactionTrait,
};
use tokio::runtime::Handle;

use vigil_ledger_core::LedgerResult;

pub fn advisory_key(key: &str) -> i64 {
    let hash = blake3::hash(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_be_bytes(bytes)
}

/// Blocks until the lock is held; released when the transaction ends.
pub async fn lock_transaction(tx: &DatabaseTransaction, key: &str) -> LedgerResult<()> {
    let backend = tx.get_database_backend();
    if backend != DatabaseBackend::Postgres {
        return Ok(());
    }
    tx.execute_raw(Statement::from_sql_and_values(
        backend,
        "SELECT pg_advisory_xact_lock($1)",
        [advisory_key(key).into()],
    ))
    .await?;
    debug!("lock: acquired transaction lock '{key}'");
    Ok(())
}

/// Returns whether the lock was taken, without waiting.
pub async fn try_lock_transaction(tx: &DatabaseTransaction, key: &str) -> LedgerResult<bool> {
    let backend = tx.get_database_backend();
    if backend != DatabaseBackend::Postgres {
        return Ok(true);
    }
    let row = tx
        .query_one_raw(Statement::from_sql_and_values(
            backend,
            "SELECT pg_try_advisory_xact_lock($1) AS locked",
            [advisory_key(key).into()],
        ))
        .await?;
    match row {
        Some(row) => Ok(row.try_get::<bool>("", "locked")?),
        None => Ok(false),
    }
}

/// Session-scoped lock. The session is pinned by holding an open transaction
/// on one pooled connection until [`SessionLock::release`].
pub struct SessionLock {
    key: String,
    lock_id: i64,
    tx: Option<DatabaseTransaction>,
}

impl SessionLock {
    pub async fn acquire(conn: &DatabaseConnection, key: &str) -> LedgerResult<Self> {
        let tx = conn.begin().await?;
        let lock_id = advisory_key(key);
        let backend = tx.get_database_backend();
        if backend == DatabaseBackend::Postgres {
            tx.execute_raw(Statement::from_sql_and_values(
                backend,
                "SELECT pg_advisory_lock($1)",
                [lock_id.into()],
            ))
            .await?;
        }
        debug!("lock: acquired session lock '{key}'");
        Ok(Self {
            key: key.to_string(),
            lock_id,
            tx: Some(tx),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> LedgerResult<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        let backend = tx.get_database_backend();
        if backend == DatabaseBackend::Postgres {
            tx.execute_raw(Statement::from_sql_and_values(
                backend,
                "SELECT pg_advisory_unlock($1)",
                [self.lock_id.into()],
            ))
            .await?;
        }
        tx.commit().await?;
        debug!("lock: released session lock '{}'", self.key);
        Ok(())
    }
}

impl Drop for SessionLock {
    /// Unlocks on the pinned connection before it returns to the pool; a
    /// session lock otherwise outlives the transaction that took it.
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if tx.get_database_backend() != DatabaseBackend::Postgres {
            return;
        }
        warn!("lock: session lock '{}' dropped without release", self.key);
        let Ok(runtime) = Handle::try_current() else {
            error!(
                "lock: no runtime to release '{}'; it is held until its connection closes",
                self.key
            );
            return;
        };
        let key = std::mem::take(&mut self.key);
        let lock_id = self.lock_id;
        runtime.spawn(async move {
            let unlocked = tx
                .execute_raw(Statement::from_sql_and_values(
                    DatabaseBackend::Postgres,
                    "SELECT pg_advisory_unlock($1)",
                    [lock_id.into()],
                ))
                .await;
            if let Err(err) = unlocked {
                error!("lock: failed to release dropped session lock '{key}': {err}");
            }
            if let Err(err) = tx.rollback().await {
                error!("lock: rollback after releasing '{key}' failed: {err}");
            }
        });
    }
}
