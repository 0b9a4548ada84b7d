use chrono::{DateTime, Utc};
use log::error;
use sea_orm::sea_query::{
    self, Alias, ColumnDef, Expr, ExprTrait, IntoTableRef, PostgresQueryBuilder,
    QueryStatementWriter, SchemaStatementBuilder, SqliteQueryBuilder, TableRef,
    Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};
use sea_orm_migration::prelude::Iden;
use uuid::Uuid;

use vigil_ledger_core::{DataType, DatabaseSchema, LedgerError, LedgerResult, SchemaType, Value};

/// Sentinel stored in `valid_until` while a row is the current version.
pub(crate) const VALID_UNTIL_INFINITY: &str = "'infinity'";

/// Postgres identifiers are truncated past 63 bytes.
pub(crate) const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Iden, Clone, Copy)]
pub enum LedgerSchemaVersion {
    Table,
    Version,
    Checksum,
    AppliedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum DataModelEnumValues {
    Table,
    Id,
    FieldId,
    TextValue,
    FloatValue,
    LastSeen,
}

#[derive(Iden, Clone, Copy)]
pub enum ObjectColumns {
    Id,
    ObjectId,
    UpdatedAt,
    ValidFrom,
    ValidUntil,
}

/// Where a logical table lives physically. Postgres keeps one schema per
/// organization; SQLite has no schemas, so tenant tables are flattened to
/// `<schema>__<table>` and control tables keep their bare name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PhysicalTable {
    schema: Option<String>,
    name: String,
}

impl PhysicalTable {
    pub(crate) fn resolve(backend: DatabaseBackend, schema: &DatabaseSchema, table: &str) -> Self {
        match (backend, schema.schema_type) {
            (DatabaseBackend::Postgres, _) => Self {
                schema: Some(schema.schema.clone()),
                name: table.to_string(),
            },
            (_, SchemaType::Tenant) => Self {
                schema: None,
                name: format!("{}{}", sqlite_table_prefix(schema), table),
            },
            (_, SchemaType::Control) => Self {
                schema: None,
                name: table.to_string(),
            },
        }
    }

    pub(crate) fn table_ref(&self) -> TableRef {
        match &self.schema {
            Some(schema) => {
                (Alias::new(schema.as_str()), Alias::new(self.name.as_str())).into_table_ref()
            }
            None => Alias::new(self.name.as_str()).into_table_ref(),
        }
    }

    /// Schema-qualified, quoted name for hand-written DDL.
    pub(crate) fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    /// Unqualified physical name, as catalogs report it.
    pub(crate) fn bare_name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn sqlite_table_prefix(schema: &DatabaseSchema) -> String {
    format!("{}__", schema.schema)
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn ensure_supported(backend: DatabaseBackend) -> LedgerResult<()> {
    match backend {
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => Ok(()),
        _ => Err(LedgerError::storage(format!(
            "unsupported database backend {backend:?}"
        ))),
    }
}

pub(crate) fn is_current() -> Expr {
    Expr::col(ObjectColumns::ValidUntil).eq(Expr::cust(VALID_UNTIL_INFINITY))
}

pub(crate) fn is_current_in(alias: &str) -> Expr {
    Expr::col((Alias::new(alias), ObjectColumns::ValidUntil)).eq(Expr::cust(VALID_UNTIL_INFINITY))
}

pub(crate) fn id_col(backend: DatabaseBackend, col: impl Iden, nullable: bool) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Postgres => {
            col_def.uuid();
        }
        _ => {
            col_def.string_len(36);
        }
    }
    if nullable {
        col_def.null();
    } else {
        col_def.not_null();
    }
    col_def.to_owned()
}

/// Backing column for a field type. `Unknown` means the data model escaped
/// validation upstream, so it fails loudly instead of guessing a type.
pub(crate) fn field_column(name: &str, data_type: DataType) -> LedgerResult<ColumnDef> {
    let mut col_def = ColumnDef::new(Alias::new(name));
    match data_type {
        DataType::Bool => col_def.boolean(),
        DataType::Int => col_def.big_integer(),
        DataType::Float => col_def.double(),
        DataType::String => col_def.text(),
        DataType::Timestamp => col_def.timestamp_with_time_zone(),
        DataType::Unknown => {
            error!("provisioner: field '{name}' has no column type mapping");
            return Err(LedgerError::ddl(
                format!("no column type for field '{name}' of type {data_type}"),
                format!("ADD COLUMN {}", quote_ident(name)),
            ));
        }
    };
    col_def.null();
    Ok(col_def.to_owned())
}

pub(crate) fn id_value(backend: DatabaseBackend, id: Uuid) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => id.into(),
        _ => id.to_string().into(),
    }
}

pub(crate) fn read_uuid(row: &QueryResult, column: &str) -> LedgerResult<Uuid> {
    if let Ok(value) = row.try_get::<String>("", column) {
        return Uuid::parse_str(&value).map_err(|err| LedgerError::storage(err.to_string()));
    }
    if let Ok(value) = row.try_get::<Uuid>("", column) {
        return Ok(value);
    }
    Err(LedgerError::storage(format!("unsupported id format in '{column}'")))
}

pub(crate) fn null_value(data_type: DataType) -> SeaValue {
    match data_type {
        DataType::Bool => SeaValue::Bool(None),
        DataType::Int => SeaValue::BigInt(None),
        DataType::Float => SeaValue::Double(None),
        DataType::String | DataType::Unknown => SeaValue::String(None),
        DataType::Timestamp => SeaValue::ChronoDateTimeUtc(None),
    }
}

pub(crate) fn value_to_sea(value: &Value) -> SeaValue {
    match value {
        Value::Bool(value) => (*value).into(),
        Value::Int(value) => (*value).into(),
        Value::Float(value) => (*value).into(),
        Value::String(value) => value.clone().into(),
        Value::Timestamp(value) => (*value).into(),
    }
}

pub(crate) fn read_value(
    row: &QueryResult,
    column: &str,
    data_type: DataType,
) -> LedgerResult<Option<Value>> {
    Ok(match data_type {
        DataType::Bool => row.try_get::<Option<bool>>("", column)?.map(Value::Bool),
        DataType::Int => row.try_get::<Option<i64>>("", column)?.map(Value::Int),
        DataType::Float => row.try_get::<Option<f64>>("", column)?.map(Value::Float),
        DataType::String => row.try_get::<Option<String>>("", column)?.map(Value::String),
        DataType::Timestamp => row
            .try_get::<Option<DateTime<Utc>>>("", column)?
            .map(Value::Timestamp),
        DataType::Unknown => {
            return Err(LedgerError::model_inconsistency(format!(
                "column '{column}' has an unknown data type"
            )));
        }
    })
}

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_query::Values) {
    match backend {
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) fn build_schema_stmt<S: SchemaStatementBuilder>(
    backend: DatabaseBackend,
    stmt: &S,
) -> String {
    match backend {
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

/// Cuts `ident` to at most `max` bytes without splitting a character.
pub(crate) fn truncate_identifier(ident: &str, max: usize) -> &str {
    if ident.len() <= max {
        return ident;
    }
    let mut end = max;
    while !ident.is_char_boundary(end) {
        end -= 1;
    }
    &ident[..end]
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> LedgerResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> LedgerResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> LedgerResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

/// Column names of a SQLite table, in declaration order. Empty when the table
/// does not exist.
pub(crate) async fn sqlite_columns<C>(
    conn: &C,
    physical: &PhysicalTable,
) -> LedgerResult<Vec<String>>
where
    C: ConnectionTrait,
{
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT name FROM pragma_table_info(?) ORDER BY cid",
            [physical.bare_name().into()],
        ))
        .await?;
    rows.iter()
        .map(|row| row.try_get::<String>("", "name").map_err(LedgerError::from))
        .collect()
}

/// Runs one DDL statement, logging the statement itself when it fails.
pub(crate) async fn execute_ddl<C>(conn: &C, sql: String) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    match conn.execute_unprepared(&sql).await {
        Ok(_) => Ok(()),
        Err(err) => {
            error!("ddl failed: {err}; statement: {sql}");
            Err(LedgerError::ddl(err.to_string(), sql))
        }
    }
}
