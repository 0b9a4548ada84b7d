mod common;

use tempfile::tempdir;
use vigil_ledger_store::{
    ConnectionRegistry, DatabaseConfig, FieldReadApi, IngestionApi, LedgerConfig, LedgerResult,
    LedgerStore, ProvisioningApi,
};

#[test]
fn config_reads_partial_json() {
    let raw = r#"{
        "database": { "backend": "postgres", "url": "postgres://ledger@db/ledger" },
        "pool": { "max_connections": 8 },
        "ingestion": { "serialize_per_table": true }
    }"#;
    let config: LedgerConfig = serde_json::from_str(raw).expect("config json");
    assert!(matches!(config.database, DatabaseConfig::Postgres { .. }));
    assert_eq!(config.pool.as_ref().and_then(|pool| pool.max_connections), Some(8));
    assert!(config.limits.is_none());
    assert!(config.serialize_ingestion_per_table());
    assert_eq!(config.index_build_timeout_secs(), 3 * 60 * 60);
}

#[test]
fn existing_config_files_win_over_defaults() {
    let dir = tempdir().expect("tempdir");
    let custom = r#"{ "database": { "backend": "sqlite", "path": "custom.sqlite" } }"#;
    std::fs::write(dir.path().join("ledger.json"), custom).expect("write config");
    let config = LedgerConfig::load_or_init(dir.path()).expect("config");
    assert_eq!(
        config.sqlite_path(dir.path()).expect("path"),
        dir.path().join("custom.sqlite")
    );
}

#[tokio::test]
async fn registry_shares_one_pool_per_target() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let config = LedgerConfig::default_sqlite("shared.sqlite");
    let url = config.connection_url(dir.path())?;
    let registry = ConnectionRegistry::new();

    let (first, second) = tokio::join!(
        registry.get_or_connect(&url, None),
        registry.get_or_connect(&url, None)
    );
    first?;
    second?;
    assert_eq!(registry.len(), 1);

    let other = LedgerConfig::default_sqlite("other.sqlite").connection_url(dir.path())?;
    registry.get_or_connect(&other, None).await?;
    assert_eq!(registry.len(), 2);

    registry.close_all().await?;
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn stores_on_a_shared_registry_see_each_other() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let config = LedgerConfig::default_sqlite("shared.sqlite");
    let registry = ConnectionRegistry::new();
    let writer = LedgerStore::connect_with(&registry, &config, dir.path()).await?;
    let reader = LedgerStore::connect_with(&registry, &config, dir.path()).await?;
    assert_eq!(registry.len(), 1);

    let schema = common::tenant();
    let model = common::fraud_model();
    writer.provision_data_model(&schema, &model).await?;
    let table = model.table("branches")?;
    writer
        .ingest_objects(&schema, table, &[common::branch("B1", 1, "Lyon")])
        .await?;

    let seen = reader.list_all_objects(&schema, table).await?;
    assert_eq!(seen.len(), 1);
    Ok(())
}

#[tokio::test]
async fn opening_a_fresh_directory_writes_a_default_config() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path().join("nested");
    let store = LedgerStore::open(&base).await?;
    assert!(base.join("ledger.json").exists());
    assert!(base.join("ledger.sqlite").exists());
    assert_eq!(store.backend(), sea_orm::DatabaseBackend::Sqlite);
    Ok(())
}
