mod common;

use common::{at, provisioned};
use tempfile::tempdir;
use vigil_ledger_store::{
    ClientObject, DataType, Field, FieldReadApi, IngestionApi, LedgerError, LedgerResult,
    ProvisioningApi, Value,
};

#[tokio::test]
async fn provisioning_is_idempotent() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, model) = provisioned(dir.path()).await?;

    store.provision_data_model(&schema, &model).await?;
    store.create_schema(&schema).await?;
    store.create_table(&schema, "transactions").await?;
    let amount = model.table("transactions")?.field("amount")?;
    store.create_field(&schema, "transactions", amount).await?;
    Ok(())
}

#[tokio::test]
async fn tables_gain_columns_over_time() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, model) = provisioned(dir.path()).await?;
    let channel = Field::new("channel", DataType::String).nullable();
    let flagged = Field::new("flagged", DataType::Bool).nullable();
    let seen_at = Field::new("seen_at", DataType::Timestamp).nullable();
    let attempts = Field::new("attempts", DataType::Int).nullable();
    let table = model
        .table("transactions")?
        .clone()
        .with_field(channel.clone())
        .with_field(flagged.clone())
        .with_field(seen_at.clone())
        .with_field(attempts.clone());
    for field in [&channel, &flagged, &seen_at, &attempts] {
        store.create_field(&schema, &table.name, field).await?;
    }

    let payload = ClientObject::new("transactions")
        .with("object_id", "T1")
        .with("updated_at", at(1))
        .with("channel", "web")
        .with("flagged", true)
        .with("seen_at", at(0))
        .with("attempts", 3i64);
    store.ingest_objects(&schema, &table, &[payload]).await?;

    let objects = store.list_all_objects(&schema, &table).await?;
    let data = &objects[0].data;
    assert_eq!(data["channel"], Some(Value::from("web")));
    assert_eq!(data["flagged"], Some(Value::Bool(true)));
    assert_eq!(data["seen_at"], Some(Value::Timestamp(at(0))));
    assert_eq!(data["attempts"], Some(Value::Int(3)));
    Ok(())
}

#[tokio::test]
async fn reserved_names_cannot_become_fields() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;
    let err = store
        .create_field(&schema, "transactions", &Field::new("valid_until", DataType::String))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn unmapped_types_fail_loudly() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;
    let err = store
        .create_field(&schema, "transactions", &Field::new("blob", DataType::Unknown))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Ddl { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn tenants_are_isolated() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, model) = provisioned(dir.path()).await?;
    let other = common::tenant();
    store.provision_data_model(&other, &model).await?;
    let table = model.table("transactions")?;

    store
        .ingest_objects(&schema, table, &[common::transaction("T1", 1, 1.0)])
        .await?;
    assert_eq!(store.list_all_objects(&schema, table).await?.len(), 1);
    assert!(store.list_all_objects(&other, table).await?.is_empty());
    Ok(())
}
