pub mod config;
mod db;
pub mod enum_values;
pub mod index_jobs;
pub mod indexes;
pub mod ingestion;
pub mod lock;
pub mod migration;
pub mod provisioner;
pub mod registry;
pub mod resolver;
pub mod store;

pub use vigil_ledger_core::*;
pub use config::{
    DEFAULT_INDEX_BUILD_TIMEOUT_SECS, DatabaseConfig, IndexingConfig, IngestionConfig,
    LedgerConfig, LimitsConfig, PoolConfig, default_sqlite_path,
};
pub use index_jobs::IndexJobQueue;
pub use indexes::index_name;
pub use ingestion::ingest_objects_in;
pub use lock::{SessionLock, advisory_key, lock_transaction, try_lock_transaction};
pub use registry::ConnectionRegistry;
pub use store::LedgerStore;
