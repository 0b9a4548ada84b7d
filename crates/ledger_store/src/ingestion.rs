//! Reconciles a batch of payloads for one table against its current rows.
//!
//! Rows are versioned, never rewritten: a newer payload marks the current row
//! obsolete (`valid_until = now`) and inserts a fresh current row. A payload
//! that is not strictly newer than the current row is dropped, which makes
//! re-ingesting the same batch a no-op.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SubsecRound, Utc};
use log::info;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Query, Value as SeaValue};
use sea_orm::{ConnectionTrait, DatabaseBackend};
use uuid::Uuid;

use crate::db::{
    ObjectColumns, PhysicalTable, col_name, exec, id_value, is_current, null_value, query_all,
    read_uuid, value_to_sea,
};
use crate::enum_values::{EnumObservations, record_enum_values};
use vigil_ledger_core::{
    ClientPayload, DatabaseSchema, ID_COLUMN, IngestionReport, LedgerError, LedgerResult, Table,
    Value,
};

/// Bound parameters per statement; stays under both SQLite's and Postgres'
/// limits with room to spare.
const MAX_BIND_PARAMS: usize = 30_000;
const LOOKUP_CHUNK: usize = 1_000;

/// One deduplicated payload, already validated and converted to column values
/// in the table's field order.
pub(crate) struct Candidate<'a, P> {
    object_id: String,
    updated_at: DateTime<Utc>,
    values: Vec<SeaValue>,
    payload: &'a P,
}

/// `timestamptz` keeps microseconds. Comparing at chrono's nanosecond
/// precision would make a re-ingested payload look newer than its own row.
pub(crate) fn to_stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

pub(crate) fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Validates every payload, then keeps the newest payload per object id.
/// Equal `updated_at` values resolve to the payload later in the batch. Any
/// malformed payload rejects the whole batch.
pub(crate) fn prepare_batch<'a, P>(
    table: &Table,
    payloads: &'a [P],
) -> LedgerResult<BTreeMap<String, Candidate<'a, P>>>
where
    P: ClientPayload,
{
    let mut latest: BTreeMap<String, Candidate<'a, P>> = BTreeMap::new();
    for (position, payload) in payloads.iter().enumerate() {
        if payload.table_name() != table.name {
            return Err(LedgerError::validation(format!(
                "payload {position} belongs to table '{}', not '{}'",
                payload.table_name(),
                table.name
            )));
        }
        let object_id = payload.object_id()?;
        let updated_at = to_stored_precision(payload.updated_at()?);

        let mut values = Vec::with_capacity(table.fields.len());
        for field in table.fields.values() {
            let value = match payload.read_field(&field.name) {
                Some(value) => {
                    let actual = value.data_type();
                    let coerced = value.coerce_to(field.data_type).ok_or_else(|| {
                        LedgerError::validation(format!(
                            "object '{object_id}': field '{}' expects {}, got {actual}",
                            field.name, field.data_type
                        ))
                    })?;
                    value_to_sea(&match coerced {
                        Value::Timestamp(at) => Value::Timestamp(to_stored_precision(at)),
                        other => other,
                    })
                }
                None => null_value(field.data_type),
            };
            values.push(value);
        }

        let candidate = Candidate {
            object_id: object_id.clone(),
            updated_at,
            values,
            payload,
        };
        match latest.get(&object_id) {
            Some(kept) if kept.updated_at > updated_at => {}
            _ => {
                latest.insert(object_id, candidate);
            }
        }
    }
    Ok(latest)
}

/// Runs the whole reconciliation on `conn`. Atomicity across the obsolete,
/// insert and dictionary statements is up to the caller's transaction.
pub async fn ingest_objects_in<C, P>(
    conn: &C,
    schema: &DatabaseSchema,
    table: &Table,
    payloads: &[P],
) -> LedgerResult<IngestionReport>
where
    C: ConnectionTrait,
    P: ClientPayload,
{
    let batch = prepare_batch(table, payloads)?;
    reconcile(conn, schema, table, payloads.len(), batch).await
}

pub(crate) async fn reconcile<C, P>(
    conn: &C,
    schema: &DatabaseSchema,
    table: &Table,
    received: usize,
    batch: BTreeMap<String, Candidate<'_, P>>,
) -> LedgerResult<IngestionReport>
where
    C: ConnectionTrait,
    P: ClientPayload,
{
    let backend = conn.get_database_backend();
    let physical = PhysicalTable::resolve(backend, schema, &table.name);
    if batch.is_empty() {
        return Ok(IngestionReport::default());
    }

    let object_ids: Vec<&str> = batch.keys().map(String::as_str).collect();
    let current = load_current(conn, &physical, &object_ids).await?;

    let mut to_insert: Vec<&Candidate<'_, P>> = Vec::new();
    let mut to_obsolete: Vec<Uuid> = Vec::new();
    for candidate in batch.values() {
        match current.get(&candidate.object_id) {
            None => to_insert.push(candidate),
            Some(rows) => {
                let newest = rows.iter().map(|(_, updated_at)| *updated_at).max();
                if newest.is_some_and(|newest| newest >= candidate.updated_at) {
                    continue;
                }
                // Concurrent unserialised ingestion can leave more than one
                // current row; all of them are superseded here.
                to_obsolete.extend(rows.iter().map(|(id, _)| *id));
                to_insert.push(candidate);
            }
        }
    }

    let obsoleted = obsolete_rows(conn, backend, &physical, &to_obsolete).await?;
    insert_rows(conn, backend, &physical, table, &to_insert).await?;

    let inserted_payloads: Vec<&P> = to_insert.iter().map(|candidate| candidate.payload).collect();
    let observations = EnumObservations::collect(table, &inserted_payloads);
    record_enum_values(conn, &observations).await?;

    let report = IngestionReport {
        inserted: to_insert.len(),
        obsoleted,
        dropped: received - to_insert.len(),
    };
    info!(
        "ingestion: {} inserted={} obsoleted={} dropped={}",
        physical.quoted(),
        report.inserted,
        report.obsoleted,
        report.dropped
    );
    Ok(report)
}

async fn load_current<C>(
    conn: &C,
    physical: &PhysicalTable,
    object_ids: &[&str],
) -> LedgerResult<HashMap<String, Vec<(Uuid, DateTime<Utc>)>>>
where
    C: ConnectionTrait,
{
    let mut current: HashMap<String, Vec<(Uuid, DateTime<Utc>)>> = HashMap::new();
    for chunk in object_ids.chunks(LOOKUP_CHUNK) {
        let select = Query::select()
            .from(physical.table_ref())
            .columns([
                ObjectColumns::Id,
                ObjectColumns::ObjectId,
                ObjectColumns::UpdatedAt,
            ])
            .and_where(Expr::col(ObjectColumns::ObjectId).is_in(chunk.iter().copied()))
            .and_where(is_current())
            .to_owned();
        for row in query_all(conn, &select).await? {
            let id = read_uuid(&row, ID_COLUMN)?;
            let object_id: String = row.try_get("", &col_name(ObjectColumns::ObjectId))?;
            let updated_at: DateTime<Utc> =
                row.try_get("", &col_name(ObjectColumns::UpdatedAt))?;
            current.entry(object_id).or_default().push((id, updated_at));
        }
    }
    Ok(current)
}

async fn obsolete_rows<C>(
    conn: &C,
    backend: DatabaseBackend,
    physical: &PhysicalTable,
    ids: &[Uuid],
) -> LedgerResult<usize>
where
    C: ConnectionTrait,
{
    let mut obsoleted = 0usize;
    for chunk in ids.chunks(LOOKUP_CHUNK) {
        let update = Query::update()
            .table(physical.table_ref())
            .value(ObjectColumns::ValidUntil, Expr::current_timestamp())
            .and_where(
                Expr::col(ObjectColumns::Id)
                    .is_in(chunk.iter().map(|id| id_value(backend, *id))),
            )
            .and_where(is_current())
            .to_owned();
        obsoleted += exec(conn, &update).await? as usize;
    }
    Ok(obsoleted)
}

async fn insert_rows<C, P>(
    conn: &C,
    backend: DatabaseBackend,
    physical: &PhysicalTable,
    table: &Table,
    rows: &[&Candidate<'_, P>],
) -> LedgerResult<()>
where
    C: ConnectionTrait,
    P: ClientPayload,
{
    let mut columns: Vec<Alias> = vec![Alias::new(ID_COLUMN)];
    columns.extend(table.fields.keys().map(|name| Alias::new(name.as_str())));

    for chunk in rows.chunks(rows_per_statement(columns.len())) {
        let mut insert = Query::insert();
        insert
            .into_table(physical.table_ref())
            .columns(columns.clone());
        for candidate in chunk {
            let mut row: Vec<Expr> = Vec::with_capacity(columns.len());
            row.push(id_value(backend, Uuid::new_v4()).into());
            row.extend(candidate.values.iter().cloned().map(Expr::from));
            insert
                .values(row)
                .map_err(|err| LedgerError::storage(err.to_string()))?;
        }
        exec(conn, &insert).await?;
    }
    Ok(())
}
