use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Aggregator, ClientObject, ClientPayload, ConcreteIndex, DataModel, DatabaseSchema, Field,
    FieldId, Filter, IndexJobSummary, LedgerResult, PhysicalIndex, Table, Value,
};

#[async_trait]
pub trait ProvisioningApi {
    async fn create_schema(&self, schema: &DatabaseSchema) -> LedgerResult<()>;
    async fn create_table(&self, schema: &DatabaseSchema, table_name: &str) -> LedgerResult<()>;
    async fn create_field(
        &self,
        schema: &DatabaseSchema,
        table_name: &str,
        field: &Field,
    ) -> LedgerResult<()>;
    async fn provision_data_model(
        &self,
        schema: &DatabaseSchema,
        data_model: &DataModel,
    ) -> LedgerResult<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub inserted: usize,
    pub obsoleted: usize,
    pub dropped: usize,
}

#[async_trait]
pub trait IngestionApi {
    async fn ingest_objects<P>(
        &self,
        schema: &DatabaseSchema,
        table: &Table,
        payloads: &[P],
    ) -> LedgerResult<IngestionReport>
    where
        P: ClientPayload;
}

#[async_trait]
pub trait FieldReadApi {
    /// Follows `path` from the payload's table and reads `field_name` on the
    /// last table reached. Every hop only sees currently valid rows.
    async fn get_db_field(
        &self,
        schema: &DatabaseSchema,
        data_model: &DataModel,
        payload: &dyn ClientPayload,
        path: &[String],
        field_name: &str,
    ) -> LedgerResult<Option<Value>>;

    async fn aggregate(
        &self,
        schema: &DatabaseSchema,
        table: &Table,
        field_name: &str,
        aggregator: Aggregator,
        filters: &[Filter],
    ) -> LedgerResult<Option<Value>>;

    async fn list_all_objects(
        &self,
        schema: &DatabaseSchema,
        table: &Table,
    ) -> LedgerResult<Vec<ClientObject>>;
}

#[async_trait]
pub trait IndexApi {
    async fn list_valid_or_pending_indexes(
        &self,
        schema: &DatabaseSchema,
    ) -> LedgerResult<Vec<ConcreteIndex>>;

    async fn list_physical_indexes(
        &self,
        schema: &DatabaseSchema,
    ) -> LedgerResult<Vec<PhysicalIndex>>;

    async fn count_pending_indexes(&self, schema: &DatabaseSchema) -> LedgerResult<usize>;

    /// Queues the indexes for a background build and returns the job id at once.
    /// Build failures land on the job, never on the caller.
    async fn create_indexes_async(
        &self,
        schema: &DatabaseSchema,
        indexes: Vec<ConcreteIndex>,
    ) -> Uuid;

    async fn index_job(&self, job_id: Uuid) -> Option<IndexJobSummary>;

    async fn list_index_jobs(&self) -> Vec<IndexJobSummary>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EnumValue {
    Text(String),
    Float(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumValueEntry {
    pub field_id: FieldId,
    pub value: EnumValue,
    pub last_seen: DateTime<Utc>,
}

#[async_trait]
pub trait EnumValuesApi {
    async fn list_enum_values(&self, field_id: FieldId) -> LedgerResult<Vec<EnumValueEntry>>;
}
