#![allow(dead_code)]

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ConnectionTrait, Statement};
use vigil_ledger_store::{
    ClientObject, DataModel, DataType, DatabaseSchema, Field, LedgerConfig, LedgerResult,
    LedgerStore, LinkToSingle, OrganizationId, ProvisioningApi, Table,
};

pub async fn open(base: &Path) -> LedgerResult<LedgerStore> {
    let config = LedgerConfig::default_sqlite(base.join("ledger.sqlite").to_string_lossy());
    LedgerStore::connect(&config, base).await
}

pub fn tenant() -> DatabaseSchema {
    DatabaseSchema::for_organization(OrganizationId::new())
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

fn link(name: &str, child: &str, child_field: &str, parent: &str) -> LinkToSingle {
    LinkToSingle {
        name: name.to_string(),
        parent_table_name: parent.to_string(),
        parent_field_name: "object_id".to_string(),
        child_table_name: child.to_string(),
        child_field_name: child_field.to_string(),
    }
}

/// transactions -> accounts -> branches
pub fn fraud_model() -> DataModel {
    DataModel::new()
        .with_table(
            Table::new("transactions")
                .with_field(Field::new("amount", DataType::Float).nullable())
                .with_field(Field::new("status", DataType::String).nullable().with_enum_values())
                .with_field(Field::new("account_id", DataType::String).nullable())
                .with_link(link("account", "transactions", "account_id", "accounts")),
        )
        .with_table(
            Table::new("accounts")
                .with_field(Field::new("balance", DataType::Float).nullable())
                .with_field(Field::new("branch_id", DataType::String).nullable())
                .with_link(link("branch", "accounts", "branch_id", "branches")),
        )
        .with_table(
            Table::new("branches").with_field(Field::new("city", DataType::String).nullable()),
        )
}

pub async fn provisioned(base: &Path) -> LedgerResult<(LedgerStore, DatabaseSchema, DataModel)> {
    let store = open(base).await?;
    let schema = tenant();
    let model = fraud_model();
    store.provision_data_model(&schema, &model).await?;
    Ok((store, schema, model))
}

pub fn transaction(object_id: &str, hour: u32, amount: f64) -> ClientObject {
    ClientObject::new("transactions")
        .with("object_id", object_id)
        .with("updated_at", at(hour))
        .with("amount", amount)
}

pub fn account(object_id: &str, hour: u32, branch_id: &str) -> ClientObject {
    ClientObject::new("accounts")
        .with("object_id", object_id)
        .with("updated_at", at(hour))
        .with("branch_id", branch_id)
}

pub fn branch(object_id: &str, hour: u32, city: &str) -> ClientObject {
    ClientObject::new("branches")
        .with("object_id", object_id)
        .with("updated_at", at(hour))
        .with("city", city)
}

/// Row counts for one object: (all versions, current versions).
pub async fn version_counts(
    store: &LedgerStore,
    schema: &DatabaseSchema,
    table: &str,
    object_id: &str,
) -> LedgerResult<(i64, i64)> {
    let sql = format!(
        "SELECT COUNT(*) AS total, \
         COALESCE(SUM(CASE WHEN valid_until = 'infinity' THEN 1 ELSE 0 END), 0) AS current \
         FROM \"{}__{}\" WHERE object_id = ?",
        schema.schema, table
    );
    let row = store
        .connection()
        .query_one_raw(Statement::from_sql_and_values(
            store.backend(),
            sql,
            [object_id.into()],
        ))
        .await?
        .expect("count row");
    Ok((row.try_get("", "total")?, row.try_get("", "current")?))
}
