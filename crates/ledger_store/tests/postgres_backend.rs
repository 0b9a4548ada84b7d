//! Postgres-only behaviour. Runs when `LEDGER_PG_URL` points at a database the
//! tests may create schemas in; otherwise every test returns early.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{account, branch, fraud_model, tenant, transaction};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement, TransactionTrait};
use tempfile::tempdir;
use vigil_ledger_store::{
    Aggregator, ClientObject, ConcreteIndex, DataModel, DatabaseSchema, FieldReadApi, IndexApi,
    IndexJobStatus, IndexState, IngestionApi, LedgerConfig, LedgerResult, LedgerStore,
    ProvisioningApi, SessionLock, Value, lock_transaction, try_lock_transaction,
};

async fn connect() -> LedgerResult<Option<LedgerStore>> {
    let url = match std::env::var("LEDGER_PG_URL") {
        Ok(url) => url,
        Err(_) => return Ok(None),
    };
    let dir = tempdir().expect("tempdir");
    let store = LedgerStore::connect(&LedgerConfig::postgres(url), dir.path()).await?;
    assert_eq!(store.backend(), DatabaseBackend::Postgres);
    Ok(Some(store))
}

async fn provisioned() -> LedgerResult<Option<(LedgerStore, DatabaseSchema, DataModel)>> {
    let Some(store) = connect().await? else {
        return Ok(None);
    };
    let schema = tenant();
    let model = fraud_model();
    store.provision_data_model(&schema, &model).await?;
    Ok(Some((store, schema, model)))
}

async fn version_counts(
    store: &LedgerStore,
    schema: &DatabaseSchema,
    table: &str,
    object_id: &str,
) -> LedgerResult<(i64, i64)> {
    let sql = format!(
        "SELECT COUNT(*) AS total, \
         COALESCE(SUM(CASE WHEN valid_until = 'infinity' THEN 1 ELSE 0 END), 0) AS current \
         FROM \"{}\".\"{}\" WHERE object_id = $1",
        schema.schema, table
    );
    let row = store
        .connection()
        .query_one_raw(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql,
            [object_id.into()],
        ))
        .await?
        .expect("count row");
    Ok((row.try_get("", "total")?, row.try_get("", "current")?))
}

#[tokio::test]
async fn reingestion_is_idempotent_at_microsecond_storage() -> LedgerResult<()> {
    let Some((store, schema, model)) = provisioned().await? else {
        return Ok(());
    };
    let table = model.table("transactions")?;
    let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let batch = vec![
        ClientObject::new("transactions")
            .with("object_id", "A")
            .with("updated_at", precise)
            .with("amount", 12.5),
    ];

    let first = store.ingest_objects(&schema, table, &batch).await?;
    assert_eq!((first.inserted, first.obsoleted), (1, 0));
    let second = store.ingest_objects(&schema, table, &batch).await?;
    assert_eq!((second.inserted, second.obsoleted, second.dropped), (0, 0, 1));
    assert_eq!(version_counts(&store, &schema, "transactions", "A").await?, (1, 1));

    let newer = vec![transaction("A", 23, 20.0)];
    let report = store.ingest_objects(&schema, table, &newer).await?;
    assert_eq!((report.inserted, report.obsoleted), (1, 1));
    assert_eq!(version_counts(&store, &schema, "transactions", "A").await?, (2, 1));
    Ok(())
}

#[tokio::test]
async fn two_hop_reads_and_aggregates() -> LedgerResult<()> {
    let Some((store, schema, model)) = provisioned().await? else {
        return Ok(());
    };
    store
        .ingest_objects(&schema, model.table("branches")?, &[branch("B1", 1, "Lyon")])
        .await?;
    store
        .ingest_objects(&schema, model.table("accounts")?, &[account("A1", 1, "B1")])
        .await?;
    let trigger = transaction("T1", 2, 40.0).with("account_id", "A1");
    let other = transaction("T2", 2, 60.0).with("account_id", "A1");
    store
        .ingest_objects(&schema, model.table("transactions")?, &[trigger.clone(), other])
        .await?;

    let path = vec!["account".to_string(), "branch".to_string()];
    let city = store
        .get_db_field(&schema, &model, &trigger, &path, "city")
        .await?;
    assert_eq!(city, Some(Value::String("Lyon".to_string())));

    let table = model.table("transactions")?;
    let sum = store
        .aggregate(&schema, table, "amount", Aggregator::Sum, &[])
        .await?;
    assert_eq!(sum, Some(Value::Float(100.0)));
    let count = store
        .aggregate(&schema, table, "amount", Aggregator::Count, &[])
        .await?;
    assert_eq!(count, Some(Value::Int(2)));
    Ok(())
}

#[tokio::test]
async fn covering_indexes_are_listed_with_their_included_columns() -> LedgerResult<()> {
    let Some((store, schema, _)) = provisioned().await? else {
        return Ok(());
    };
    let wanted = ConcreteIndex::new("transactions", vec!["account_id".to_string()])
        .including(vec!["amount".to_string()]);
    let job = store.create_indexes_async(&schema, vec![wanted.clone()]).await;
    assert_eq!(store.wait_for_index_job(job).await?, IndexJobStatus::Succeeded);

    let physical = store.list_physical_indexes(&schema).await?;
    let built = physical
        .iter()
        .find(|candidate| candidate.index == wanted)
        .expect("covering index is listed");
    assert_eq!(built.state, IndexState::Valid);
    assert!(
        physical
            .iter()
            .all(|candidate| candidate.index.indexed != vec!["id".to_string()]),
        "primary keys are not reported"
    );
    assert_eq!(store.count_pending_indexes(&schema).await?, 0);

    let narrower = ConcreteIndex::new("transactions", vec!["account_id".to_string()]);
    assert_eq!(store.ensure_indexes(&schema, vec![narrower]).await?, None);
    Ok(())
}

#[tokio::test]
async fn transaction_locks_exclude_other_sessions() -> LedgerResult<()> {
    let Some(store) = connect().await? else {
        return Ok(());
    };
    let key = format!("test:{}", tenant().schema);
    let holder = store.connection().begin().await?;
    lock_transaction(&holder, &key).await?;

    let contender = store.connection().begin().await?;
    assert!(!try_lock_transaction(&contender, &key).await?);
    contender.rollback().await?;

    holder.commit().await?;
    let next = store.connection().begin().await?;
    assert!(try_lock_transaction(&next, &key).await?);
    next.commit().await?;
    Ok(())
}

#[tokio::test]
async fn dropped_session_locks_are_released() -> LedgerResult<()> {
    let Some(store) = connect().await? else {
        return Ok(());
    };
    // A separate pool guarantees the second acquire runs on another session.
    let Some(other) = connect().await? else {
        return Ok(());
    };
    let key = format!("session:{}", tenant().schema);

    let lock = SessionLock::acquire(store.connection(), &key).await?;
    assert_eq!(lock.key(), key);
    drop(lock);

    let reacquired = tokio::time::timeout(
        Duration::from_secs(10),
        SessionLock::acquire(other.connection(), &key),
    )
    .await
    .expect("dropped lock is released")?;
    reacquired.release().await?;

    let check = other.connection().begin().await?;
    assert!(try_lock_transaction(&check, &key).await?);
    check.rollback().await?;
    Ok(())
}
