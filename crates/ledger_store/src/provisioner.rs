//! Idempotent DDL for tenant schemas, object tables and field columns.

use log::{debug, info};
use sea_orm::sea_query::{self, ColumnDef, Expr, Index};
use sea_orm::{ConnectionTrait, DatabaseBackend};

use crate::db::{
    MAX_IDENTIFIER_LEN, ObjectColumns, PhysicalTable, VALID_UNTIL_INFINITY, build_schema_stmt,
    execute_ddl, field_column, id_col, quote_ident, sqlite_columns, truncate_identifier,
};
use vigil_ledger_core::{
    DataModel, DatabaseSchema, Field, LedgerError, LedgerResult, OBJECT_ID_FIELD,
    RESERVED_COLUMNS, UPDATED_AT_FIELD,
};

pub async fn create_schema<C>(conn: &C, schema: &DatabaseSchema) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    match conn.get_database_backend() {
        DatabaseBackend::Postgres => {
            let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&schema.schema));
            execute_ddl(conn, sql).await?;
            info!("provisioner: ensured schema {}", schema.schema);
        }
        _ => debug!(
            "provisioner: schema {} is a table prefix on this backend",
            schema.schema
        ),
    }
    Ok(())
}

/// Creates the table with its five invariant columns and the lookup index used
/// to find the current version of an object.
pub async fn create_table<C>(
    conn: &C,
    schema: &DatabaseSchema,
    table_name: &str,
) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let physical = PhysicalTable::resolve(backend, schema, table_name);

    let mut id = id_col(backend, ObjectColumns::Id, false);
    id.primary_key();
    let create = sea_query::Table::create()
        .table(physical.table_ref())
        .if_not_exists()
        .col(id)
        .col(ColumnDef::new(ObjectColumns::ObjectId).text().not_null())
        .col(
            ColumnDef::new(ObjectColumns::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(ObjectColumns::ValidFrom)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(ObjectColumns::ValidUntil)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::cust(VALID_UNTIL_INFINITY)),
        )
        .to_owned();
    execute_ddl(conn, build_schema_stmt(backend, &create)).await?;

    let index_name = format!(
        "{}_current",
        truncate_identifier(physical.bare_name(), MAX_IDENTIFIER_LEN - "_current".len())
    );
    let index = Index::create()
        .name(index_name)
        .table(physical.table_ref())
        .col(ObjectColumns::ObjectId)
        .col(ObjectColumns::ValidUntil)
        .if_not_exists()
        .to_owned();
    execute_ddl(conn, build_schema_stmt(backend, &index)).await?;

    info!("provisioner: ensured table {}", physical.quoted());
    Ok(())
}

/// Adds a nullable column backing `field`. The invariant business columns are
/// created with the table and are skipped here.
pub async fn create_field<C>(
    conn: &C,
    schema: &DatabaseSchema,
    table_name: &str,
    field: &Field,
) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    if RESERVED_COLUMNS.contains(&field.name.as_str()) {
        return Err(LedgerError::validation(format!(
            "field name '{}' is reserved",
            field.name
        )));
    }
    if field.name == OBJECT_ID_FIELD || field.name == UPDATED_AT_FIELD {
        return Ok(());
    }

    let backend = conn.get_database_backend();
    let physical = PhysicalTable::resolve(backend, schema, table_name);
    let column = field_column(&field.name, field.data_type)?;

    let alter = match backend {
        DatabaseBackend::Postgres => sea_query::Table::alter()
            .table(physical.table_ref())
            .add_column_if_not_exists(column)
            .to_owned(),
        _ => {
            if sqlite_columns(conn, &physical).await?.contains(&field.name) {
                debug!(
                    "provisioner: column {} already on {}",
                    field.name,
                    physical.quoted()
                );
                return Ok(());
            }
            sea_query::Table::alter()
                .table(physical.table_ref())
                .add_column(column)
                .to_owned()
        }
    };
    execute_ddl(conn, build_schema_stmt(backend, &alter)).await?;
    info!(
        "provisioner: ensured column {} ({}) on {}",
        field.name,
        field.data_type,
        physical.quoted()
    );
    Ok(())
}

pub async fn provision_data_model<C>(
    conn: &C,
    schema: &DatabaseSchema,
    data_model: &DataModel,
) -> LedgerResult<()>
where
    C: ConnectionTrait,
{
    data_model.validate()?;
    create_schema(conn, schema).await?;
    for table in data_model.tables.values() {
        create_table(conn, schema, &table.name).await?;
        for field in table.fields.values() {
            create_field(conn, schema, &table.name, field).await?;
        }
    }
    Ok(())
}
