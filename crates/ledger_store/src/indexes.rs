//! Physical index discovery and creation.
//!
//! Nothing about indexes is persisted by the ledger: existence and build state
//! are read back from the database catalog on every call.

use std::collections::BTreeMap;

use log::{debug, info};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use uuid::Uuid;

use crate::db::{
    PhysicalTable, execute_ddl, quote_ident, sqlite_columns, sqlite_table_prefix,
    truncate_identifier,
};
use vigil_ledger_core::{
    ConcreteIndex, DatabaseSchema, IndexState, LedgerError, LedgerResult, PhysicalIndex,
};

/// Leaves room for `_` plus the 8 character discriminator under Postgres' 63.
const INDEX_NAME_BASE_LEN: usize = 53;
const COLUMN_SEPARATOR: char = '\u{1f}';

const POSTGRES_INDEXES_SQL: &str = r#"
SELECT c.relname AS index_name,
       t.relname AS table_name,
       i.indisvalid AS is_valid,
       EXISTS (
           SELECT 1 FROM pg_stat_progress_create_index p
           WHERE p.index_relid = i.indexrelid
       ) AS in_progress,
       i.indnkeyatts::int8 AS key_count,
       string_agg(a.attname::text, chr(31) ORDER BY k.ord) AS columns
FROM pg_index i
JOIN pg_class c ON c.oid = i.indexrelid
JOIN pg_class t ON t.oid = i.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE n.nspname = $1 AND NOT i.indisprimary
GROUP BY c.relname, t.relname, i.indisvalid, i.indexrelid, i.indnkeyatts
ORDER BY t.relname, c.relname
"#;

const SQLITE_INDEXES_SQL: &str = r#"
SELECT m.name AS index_name,
       m.tbl_name AS table_name,
       ii.name AS column_name
FROM sqlite_master m
JOIN pragma_index_info(m.name) ii
WHERE m.type = 'index' AND m.sql IS NOT NULL
ORDER BY m.tbl_name, m.name, ii.seqno
"#;

/// `idx_<table>_<cols>` truncated, plus a random suffix so that two requests
/// for the same logical index never collide on the name.
pub fn index_name(index: &ConcreteIndex) -> String {
    let base = format!("idx_{}_{}", index.table_name, index.indexed.join("_"));
    let discriminator = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        truncate_identifier(&base, INDEX_NAME_BASE_LEN),
        &discriminator[..8]
    )
}

pub(crate) fn create_index_sql(
    backend: DatabaseBackend,
    schema: &DatabaseSchema,
    index: &ConcreteIndex,
    name: &str,
) -> LedgerResult<String> {
    if index.indexed.is_empty() {
        return Err(LedgerError::validation(format!(
            "index on '{}' has no indexed columns",
            index.table_name
        )));
    }
    let physical = PhysicalTable::resolve(backend, schema, &index.table_name);
    let columns = quote_list(&index.indexed);
    Ok(match backend {
        DatabaseBackend::Postgres => {
            let mut sql = format!(
                "CREATE INDEX CONCURRENTLY IF NOT EXISTS {} ON {} ({columns})",
                quote_ident(name),
                physical.quoted()
            );
            if !index.included.is_empty() {
                sql.push_str(&format!(" INCLUDE ({})", quote_list(&index.included)));
            }
            sql
        }
        // No covering indexes on SQLite; included columns are dropped.
        _ => format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({columns})",
            quote_ident(name),
            physical.quoted()
        ),
    })
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds one index outside any transaction, which concurrent builds require.
pub async fn create_index<C>(
    conn: &C,
    schema: &DatabaseSchema,
    index: &ConcreteIndex,
) -> LedgerResult<String>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    if backend == DatabaseBackend::Sqlite {
        ensure_sqlite_columns(conn, schema, index).await?;
    }
    let name = index_name(index);
    let sql = create_index_sql(backend, schema, index, &name)?;
    debug!("indexes: building {name} on {}.{}", schema.schema, index.table_name);
    execute_ddl(conn, sql).await?;
    info!(
        "indexes: built {name} on {}.{} ({})",
        schema.schema,
        index.table_name,
        index.indexed.join(", ")
    );
    Ok(name)
}

/// SQLite reads an unknown double-quoted identifier as a string literal and
/// would build a constant-expression index instead of failing.
async fn ensure_sqlite_columns<C>(
    conn: &C,
    schema: &DatabaseSchema,
    index: &ConcreteIndex,
) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    let physical = PhysicalTable::resolve(DatabaseBackend::Sqlite, schema, &index.table_name);
    let columns = sqlite_columns(conn, &physical).await?;
    if columns.is_empty() {
        return Err(LedgerError::validation(format!(
            "cannot index {}: no such table",
            physical.quoted()
        )));
    }
    let missing: Vec<&str> = index
        .indexed
        .iter()
        .filter(|column| !columns.contains(column))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(LedgerError::validation(format!(
            "cannot index {}: unknown columns {}",
            physical.quoted(),
            missing.join(", ")
        )));
    }
    Ok(())
}

pub async fn list_physical_indexes<C>(
    conn: &C,
    schema: &DatabaseSchema,
) -> LedgerResult<Vec<PhysicalIndex>>
where
    C: ConnectionTrait,
{
    match conn.get_database_backend() {
        DatabaseBackend::Postgres => list_postgres(conn, schema).await,
        _ => list_sqlite(conn, schema).await,
    }
}

/// Valid and in-construction indexes. Invalid leftovers of failed concurrent
/// builds are not reported, so they get requested again.
pub async fn list_valid_or_pending_indexes<C>(
    conn: &C,
    schema: &DatabaseSchema,
) -> LedgerResult<Vec<ConcreteIndex>>
where
    C: ConnectionTrait,
{
    Ok(list_physical_indexes(conn, schema)
        .await?
        .into_iter()
        .map(|physical| physical.index)
        .collect())
}

pub async fn count_pending_indexes<C>(conn: &C, schema: &DatabaseSchema) -> LedgerResult<usize>
where
    C: ConnectionTrait,
{
    Ok(list_physical_indexes(conn, schema)
        .await?
        .iter()
        .filter(|physical| physical.state == IndexState::Pending)
        .count())
}

async fn list_postgres<C>(conn: &C, schema: &DatabaseSchema) -> LedgerResult<Vec<PhysicalIndex>>
where
    C: ConnectionTrait,
{
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            POSTGRES_INDEXES_SQL,
            [schema.schema.clone().into()],
        ))
        .await?;

    let mut indexes = Vec::with_capacity(rows.len());
    for row in rows {
        let is_valid: bool = row.try_get("", "is_valid")?;
        let in_progress: bool = row.try_get("", "in_progress")?;
        let state = match (is_valid, in_progress) {
            (true, _) => IndexState::Valid,
            (false, true) => IndexState::Pending,
            (false, false) => continue,
        };
        let key_count: i64 = row.try_get("", "key_count")?;
        let columns: String = row.try_get("", "columns")?;
        let mut indexed: Vec<String> = columns
            .split(COLUMN_SEPARATOR)
            .map(str::to_string)
            .collect();
        let included = indexed.split_off((key_count.max(0) as usize).min(indexed.len()));
        indexes.push(PhysicalIndex {
            name: row.try_get("", "index_name")?,
            index: ConcreteIndex::new(row.try_get::<String>("", "table_name")?, indexed)
                .including(included),
            state,
        });
    }
    Ok(indexes)
}

async fn list_sqlite<C>(conn: &C, schema: &DatabaseSchema) -> LedgerResult<Vec<PhysicalIndex>>
where
    C: ConnectionTrait,
{
    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            SQLITE_INDEXES_SQL,
        ))
        .await?;

    let prefix = sqlite_table_prefix(schema);
    let mut grouped: BTreeMap<(String, String), Vec<Option<String>>> = BTreeMap::new();
    for row in rows {
        let physical_table: String = row.try_get("", "table_name")?;
        let Some(table_name) = physical_table.strip_prefix(&prefix) else {
            continue;
        };
        let index_name: String = row.try_get("", "index_name")?;
        // NULL for expression key parts.
        let column: Option<String> = row.try_get("", "column_name")?;
        grouped
            .entry((table_name.to_string(), index_name))
            .or_default()
            .push(column);
    }

    let mut indexes = Vec::with_capacity(grouped.len());
    for ((table_name, name), columns) in grouped {
        let Some(columns) = columns.into_iter().collect::<Option<Vec<String>>>() else {
            debug!("indexes: skipping expression index {name} on {table_name}");
            continue;
        };
        indexes.push(PhysicalIndex {
            name,
            index: ConcreteIndex::new(table_name, columns),
            state: IndexState::Valid,
        });
    }
    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use sea_orm::DatabaseBackend;

    use super::{create_index_sql, index_name};
    use vigil_ledger_core::{ConcreteIndex, DatabaseSchema};

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn names_are_bounded_and_distinct() {
        let index = ConcreteIndex::new(
            "a_table_with_a_rather_long_name_for_testing",
            cols(&["first_column", "second_column"]),
        );
        let first = index_name(&index);
        let second = index_name(&index);
        assert_ne!(first, second);
        assert_eq!(first.len(), 62);
        assert!(first.starts_with("idx_a_table_with_a_rather_long_name_for_testing_first"));
    }

    #[test]
    fn postgres_builds_concurrently_with_included_columns() {
        let schema = DatabaseSchema::tenant("org_1");
        let index = ConcreteIndex::new("transactions", cols(&["account_id"]))
            .including(cols(&["amount"]));
        let sql = create_index_sql(DatabaseBackend::Postgres, &schema, &index, "idx_x").unwrap();
        assert_eq!(
            sql,
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"idx_x\" ON \"org_1\".\"transactions\" \
             (\"account_id\") INCLUDE (\"amount\")"
        );
    }

    #[test]
    fn sqlite_ignores_included_columns() {
        let schema = DatabaseSchema::tenant("org_1");
        let index = ConcreteIndex::new("transactions", cols(&["account_id", "updated_at"]))
            .including(cols(&["amount"]));
        let sql = create_index_sql(DatabaseBackend::Sqlite, &schema, &index, "idx_x").unwrap();
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS \"idx_x\" ON \"org_1__transactions\" \
             (\"account_id\", \"updated_at\")"
        );
    }

    #[test]
    fn empty_indexes_are_rejected() {
        let schema = DatabaseSchema::tenant("org_1");
        let index = ConcreteIndex::new("transactions", Vec::new());
        assert!(create_index_sql(DatabaseBackend::Sqlite, &schema, &index, "idx_x").is_err());
    }
}
