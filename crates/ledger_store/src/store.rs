use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use sea_orm::{DatabaseBackend, DatabaseConnection, TransactionTrait};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use crate::db::ensure_supported;
use crate::index_jobs::IndexJobQueue;
use crate::ingestion::{prepare_batch, reconcile};
use crate::migration::Migrator;
use crate::registry::ConnectionRegistry;
use crate::{DatabaseConfig, LedgerConfig, LimitsConfig};
use crate::{enum_values, indexes, lock, provisioner, resolver};
use vigil_ledger_core::{
    Aggregator, ClientObject, ClientPayload, ConcreteIndex, DataModel, DatabaseSchema,
    EnumValueEntry, EnumValuesApi, Field, FieldId, FieldReadApi, Filter, IndexApi,
    IndexJobStatus, IndexJobSummary, IngestionApi, IngestionReport, LedgerError, LedgerResult,
    PhysicalIndex, ProvisioningApi, Table, Value,
};

#[derive(Clone, Copy, Debug)]
struct LedgerLimits {
    max_ingest_batch: usize,
    max_pending_index_jobs: usize,
}

impl LedgerLimits {
    fn from_config(config: &LedgerConfig) -> Self {
        let defaults = LimitsConfig::with_defaults();
        let limits = config.limits.clone().unwrap_or(defaults);
        Self {
            max_ingest_batch: limits.max_ingest_batch.unwrap_or(5_000),
            max_pending_index_jobs: limits.max_pending_index_jobs.unwrap_or(64),
        }
    }
}

/// Entry point to one ledger database: a pooled connection, the control-plane
/// migrations, and the background index worker.
#[derive(Clone)]
pub struct LedgerStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    limits: LedgerLimits,
    serialize_ingestion: bool,
    index_jobs: IndexJobQueue,
}

impl LedgerStore {
    /// Connects on a private pool. Use [`LedgerStore::connect_with`] to share
    /// pools between stores pointing at the same database.
    pub async fn connect(config: &LedgerConfig, base_dir: &Path) -> LedgerResult<Self> {
        Self::connect_with(&ConnectionRegistry::new(), config, base_dir).await
    }

    pub async fn connect_with(
        registry: &ConnectionRegistry,
        config: &LedgerConfig,
        base_dir: &Path,
    ) -> LedgerResult<Self> {
        if let DatabaseConfig::Sqlite { .. } = config.database {
            let path = config.sqlite_path(base_dir)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| LedgerError::storage(format!("create db dir: {err}")))?;
            }
        }
        let url = config.connection_url(base_dir)?;
        let conn = registry.get_or_connect(&url, config.pool.as_ref()).await?;
        let backend = conn.get_database_backend();
        ensure_supported(backend)?;
        Migrator::up(&conn, None).await?;

        let limits = LedgerLimits::from_config(config);
        let index_jobs = IndexJobQueue::spawn(
            conn.clone(),
            limits.max_pending_index_jobs,
            Duration::from_secs(config.index_build_timeout_secs()),
        );
        info!("store: connected to {} ledger", config.backend_name());
        Ok(Self {
            conn,
            backend,
            limits,
            serialize_ingestion: config.serialize_ingestion_per_table(),
            index_jobs,
        })
    }

    /// Opens the ledger configured under `base_dir`, initialising a SQLite
    /// config there on first use.
    pub async fn open(base_dir: &Path) -> LedgerResult<Self> {
        let config = LedgerConfig::load_or_init(base_dir)?;
        Self::connect(&config, base_dir).await
    }

    pub async fn connect_sqlite(path: &Path) -> LedgerResult<Self> {
        let config = LedgerConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    /// The pooled connection, for callers composing their own transactions
    /// around [`crate::ingest_objects_in`] or the lock helpers.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    /// Queues only the indexes not already served by a valid or pending one.
    /// Returns `None` when nothing is missing.
    pub async fn ensure_indexes(
        &self,
        schema: &DatabaseSchema,
        desired: Vec<ConcreteIndex>,
    ) -> LedgerResult<Option<Uuid>> {
        let existing = indexes::list_valid_or_pending_indexes(&self.conn, schema).await?;
        let mut missing: Vec<ConcreteIndex> = Vec::new();
        for index in desired {
            let covered = existing
                .iter()
                .chain(missing.iter())
                .any(|have| have.covers(&index));
            if !covered {
                missing.push(index);
            }
        }
        if missing.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.index_jobs.enqueue(schema, missing)))
    }

    pub async fn wait_for_index_job(&self, job_id: Uuid) -> LedgerResult<IndexJobStatus> {
        self.index_jobs.wait(job_id).await
    }
}

#[async_trait]
impl ProvisioningApi for LedgerStore {
    async fn create_schema(&self, schema: &DatabaseSchema) -> LedgerResult<()> {
        provisioner::create_schema(&self.conn, schema).await
    }

    async fn create_table(&self, schema: &DatabaseSchema, table_name: &str) -> LedgerResult<()> {
        provisioner::create_table(&self.conn, schema, table_name).await
    }

    async fn create_field(
        &self,
        schema: &DatabaseSchema,
        table_name: &str,
        field: &Field,
    ) -> LedgerResult<()> {
        provisioner::create_field(&self.conn, schema, table_name, field).await
    }

    async fn provision_data_model(
        &self,
        schema: &DatabaseSchema,
        data_model: &DataModel,
    ) -> LedgerResult<()> {
        provisioner::provision_data_model(&self.conn, schema, data_model).await
    }
}

#[async_trait]
impl IngestionApi for LedgerStore {
    async fn ingest_objects<P>(
        &self,
        schema: &DatabaseSchema,
        table: &Table,
        payloads: &[P],
    ) -> LedgerResult<IngestionReport>
    where
        P: ClientPayload,
    {
        if payloads.len() > self.limits.max_ingest_batch {
            return Err(LedgerError::validation(format!(
                "batch of {} exceeds the limit of {}",
                payloads.len(),
                self.limits.max_ingest_batch
            )));
        }
        let batch = prepare_batch(table, payloads)?;

        let tx = self.conn.begin().await?;
        if self.serialize_ingestion {
            lock::lock_transaction(&tx, &format!("ingest:{}.{}", schema.schema, table.name))
                .await?;
        }
        let report = reconcile(&tx, schema, table, payloads.len(), batch).await?;
        tx.commit().await?;
        Ok(report)
    }
}

#[async_trait]
impl FieldReadApi for LedgerStore {
    async fn get_db_field(
        &self,
        schema: &DatabaseSchema,
        data_model: &DataModel,
        payload: &dyn ClientPayload,
        path: &[String],
        field_name: &str,
    ) -> LedgerResult<Option<Value>> {
        resolver::get_db_field(&self.conn, schema, data_model, payload, path, field_name).await
    }

    async fn aggregate(
        &self,
        schema: &DatabaseSchema,
        table: &Table,
        field_name: &str,
        aggregator: Aggregator,
        filters: &[Filter],
    ) -> LedgerResult<Option<Value>> {
        resolver::aggregate(&self.conn, schema, table, field_name, aggregator, filters).await
    }

    async fn list_all_objects(
        &self,
        schema: &DatabaseSchema,
        table: &Table,
    ) -> LedgerResult<Vec<ClientObject>> {
        resolver::list_all_objects(&self.conn, schema, table).await
    }
}

#[async_trait]
impl IndexApi for LedgerStore {
    async fn list_valid_or_pending_indexes(
        &self,
        schema: &DatabaseSchema,
    ) -> LedgerResult<Vec<ConcreteIndex>> {
        indexes::list_valid_or_pending_indexes(&self.conn, schema).await
    }

    async fn list_physical_indexes(
        &self,
        schema: &DatabaseSchema,
    ) -> LedgerResult<Vec<PhysicalIndex>> {
        indexes::list_physical_indexes(&self.conn, schema).await
    }

    async fn count_pending_indexes(&self, schema: &DatabaseSchema) -> LedgerResult<usize> {
        indexes::count_pending_indexes(&self.conn, schema).await
    }

    async fn create_indexes_async(
        &self,
        schema: &DatabaseSchema,
        indexes: Vec<ConcreteIndex>,
    ) -> Uuid {
        self.index_jobs.enqueue(schema, indexes)
    }

    async fn index_job(&self, job_id: Uuid) -> Option<IndexJobSummary> {
        self.index_jobs.summary(job_id)
    }

    async fn list_index_jobs(&self) -> Vec<IndexJobSummary> {
        self.index_jobs.summaries()
    }
}

#[async_trait]
impl EnumValuesApi for LedgerStore {
    async fn list_enum_values(&self, field_id: FieldId) -> LedgerResult<Vec<EnumValueEntry>> {
        enum_values::list_enum_values(&self.conn, field_id).await
    }
}
