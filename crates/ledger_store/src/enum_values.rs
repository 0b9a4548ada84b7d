//! Dictionary of observed values for enum-flagged fields.
//!
//! Recording is a side channel of ingestion: text and float values are upserted
//! by two separate statements, each refreshing `last_seen` on conflict. Values
//! stay in the dictionary after the rows that carried them are superseded.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::debug;
use sea_orm::sea_query::{Expr, ExprTrait, OnConflict, Order, Query, Value as SeaValue};
use sea_orm::{ConnectionTrait, DatabaseBackend};
use uuid::Uuid;

use crate::db::{DataModelEnumValues, col_name, exec, id_value, query_all, read_uuid};
use vigil_ledger_core::{
    ClientPayload, EnumValue, EnumValueEntry, FieldId, LedgerError, LedgerResult, Table, Value,
};

const ENUM_UPSERT_CHUNK: usize = 1_000;

/// Distinct enum values gathered from one batch of inserted payloads.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct EnumObservations {
    text: BTreeSet<(Uuid, String)>,
    // f64 keyed by bit pattern; zero is normalised so 0.0 and -0.0 collapse.
    float: BTreeSet<(Uuid, u64)>,
}

impl EnumObservations {
    pub(crate) fn collect<P: ClientPayload>(table: &Table, payloads: &[&P]) -> Self {
        let mut observations = Self::default();
        for field in table.enum_fields() {
            for payload in payloads {
                match payload.read_field(&field.name) {
                    Some(Value::String(text)) if !text.is_empty() => {
                        observations.text.insert((field.id.0, text));
                    }
                    Some(value) => {
                        if let Some(number) = value.as_f64().filter(|n| !n.is_nan()) {
                            let number = if number == 0.0 { 0.0 } else { number };
                            observations.float.insert((field.id.0, number.to_bits()));
                        }
                    }
                    None => {}
                }
            }
        }
        observations
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.text.is_empty() && self.float.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.text.len() + self.float.len()
    }
}

pub(crate) async fn record_enum_values<C>(
    conn: &C,
    observations: &EnumObservations,
) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    if observations.is_empty() {
        return Ok(());
    }
    let backend = conn.get_database_backend();
    let seen_at = Utc::now();

    let text_rows: Vec<(Uuid, SeaValue)> = observations
        .text
        .iter()
        .map(|(field_id, text)| (*field_id, text.clone().into()))
        .collect();
    upsert(conn, backend, DataModelEnumValues::TextValue, &text_rows, seen_at).await?;

    let float_rows: Vec<(Uuid, SeaValue)> = observations
        .float
        .iter()
        .map(|(field_id, bits)| (*field_id, f64::from_bits(*bits).into()))
        .collect();
    upsert(conn, backend, DataModelEnumValues::FloatValue, &float_rows, seen_at).await?;

    debug!(
        "enum_values: recorded {} values ({} text)",
        observations.len(),
        text_rows.len()
    );
    Ok(())
}

async fn upsert<C>(
    conn: &C,
    backend: DatabaseBackend,
    value_column: DataModelEnumValues,
    rows: &[(Uuid, SeaValue)],
    seen_at: DateTime<Utc>,
) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    for chunk in rows.chunks(ENUM_UPSERT_CHUNK) {
        let mut insert = Query::insert();
        insert.into_table(DataModelEnumValues::Table).columns([
            DataModelEnumValues::Id,
            DataModelEnumValues::FieldId,
            value_column,
            DataModelEnumValues::LastSeen,
        ]);
        for (field_id, value) in chunk {
            insert
                .values([
                    id_value(backend, Uuid::new_v4()).into(),
                    id_value(backend, *field_id).into(),
                    value.clone().into(),
                    seen_at.into(),
                ])
                .map_err(|err| LedgerError::storage(err.to_string()))?;
        }
        insert.on_conflict(
            OnConflict::columns([DataModelEnumValues::FieldId, value_column])
                .update_column(DataModelEnumValues::LastSeen)
                .to_owned(),
        );
        exec(conn, &insert).await?;
    }
    Ok(())
}

pub async fn list_enum_values<C>(conn: &C, field_id: FieldId) -> LedgerResult<Vec<EnumValueEntry>>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let select = Query::select()
        .from(DataModelEnumValues::Table)
        .columns([
            DataModelEnumValues::FieldId,
            DataModelEnumValues::TextValue,
            DataModelEnumValues::FloatValue,
            DataModelEnumValues::LastSeen,
        ])
        .and_where(Expr::col(DataModelEnumValues::FieldId).eq(id_value(backend, field_id.0)))
        .order_by(DataModelEnumValues::TextValue, Order::Asc)
        .order_by(DataModelEnumValues::FloatValue, Order::Asc)
        .to_owned();
    let rows = query_all(conn, &select).await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let text: Option<String> = row.try_get("", &col_name(DataModelEnumValues::TextValue))?;
        let float: Option<f64> = row.try_get("", &col_name(DataModelEnumValues::FloatValue))?;
        let value = match (text, float) {
            (Some(text), _) => EnumValue::Text(text),
            (None, Some(float)) => EnumValue::Float(float),
            (None, None) => continue,
        };
        entries.push(EnumValueEntry {
            field_id: FieldId(read_uuid(&row, &col_name(DataModelEnumValues::FieldId))?),
            value,
            last_seen: row.try_get("", &col_name(DataModelEnumValues::LastSeen))?,
        });
    }
    Ok(entries)
}
