mod common;

use common::provisioned;
use sea_orm::ConnectionTrait;
use tempfile::tempdir;
use vigil_ledger_store::{
    ConcreteIndex, IndexApi, IndexJobStatus, IndexState, LedgerResult,
};

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn provisioned_tables_carry_a_current_row_lookup() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;

    let indexes = store.list_valid_or_pending_indexes(&schema).await?;
    for table in ["accounts", "branches", "transactions"] {
        let lookup = ConcreteIndex::new(table, cols(&["object_id", "valid_until"]));
        assert!(indexes.contains(&lookup), "missing lookup on {table}: {indexes:?}");
    }
    assert_eq!(store.count_pending_indexes(&schema).await?, 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_requests_build_distinct_indexes() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;
    let wanted = ConcreteIndex::new("transactions", cols(&["account_id", "amount"]));

    let first = store.create_indexes_async(&schema, vec![wanted.clone()]).await;
    let second = store.create_indexes_async(&schema, vec![wanted.clone()]).await;
    assert_ne!(first, second);
    assert_eq!(store.wait_for_index_job(first).await?, IndexJobStatus::Succeeded);
    assert_eq!(store.wait_for_index_job(second).await?, IndexJobStatus::Succeeded);

    let built: Vec<_> = store
        .list_physical_indexes(&schema)
        .await?
        .into_iter()
        .filter(|physical| physical.index == wanted)
        .collect();
    assert_eq!(built.len(), 2);
    assert_ne!(built[0].name, built[1].name);
    assert!(built.iter().all(|physical| physical.state == IndexState::Valid));
    assert!(
        built
            .iter()
            .all(|physical| physical.name.starts_with("idx_transactions_account_id_amount_"))
    );
    Ok(())
}

#[tokio::test]
async fn ensure_skips_covered_indexes() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;

    let covered = ConcreteIndex::new("transactions", cols(&["object_id"]));
    assert_eq!(store.ensure_indexes(&schema, vec![covered]).await?, None);

    let missing = ConcreteIndex::new("accounts", cols(&["branch_id"]));
    let job = store
        .ensure_indexes(&schema, vec![missing.clone(), missing.clone()])
        .await?
        .expect("a job for the missing index");
    assert_eq!(store.wait_for_index_job(job).await?, IndexJobStatus::Succeeded);

    let summary = store.index_job(job).await.expect("job is tracked");
    assert_eq!(summary.indexes, vec![missing.clone()]);
    assert_eq!(summary.schema, schema.schema);
    assert!(summary.finished_at.is_some());

    assert_eq!(store.ensure_indexes(&schema, vec![missing]).await?, None);
    Ok(())
}

#[tokio::test]
async fn failed_builds_are_recorded_on_the_job() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;

    let broken = ConcreteIndex::new("transactions", cols(&["no_such_column"]));
    let job = store.create_indexes_async(&schema, vec![broken]).await;
    let status = store.wait_for_index_job(job).await?;
    match &status {
        IndexJobStatus::Failed(reason) => assert!(reason.contains("no_such_column"), "{reason}"),
        other => panic!("expected a failed build, got {other:?}"),
    }
    let listed = store.list_valid_or_pending_indexes(&schema).await?;
    assert!(listed.iter().all(|index| index.indexed != cols(&["no_such_column"])));
    assert_eq!(store.count_pending_indexes(&schema).await?, 0);

    // The worker keeps serving after a failure.
    let good = ConcreteIndex::new("transactions", cols(&["status"]));
    let next = store.create_indexes_async(&schema, vec![good]).await;
    assert_eq!(store.wait_for_index_job(next).await?, IndexJobStatus::Succeeded);

    let jobs = store.list_index_jobs().await;
    let ids: Vec<_> = jobs.iter().map(|summary| summary.job_id).collect();
    assert_eq!(ids, vec![job, next]);
    Ok(())
}

#[tokio::test]
async fn waiting_on_an_unknown_job_is_not_found() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, _, _) = provisioned(dir.path()).await?;
    let err = store
        .wait_for_index_job(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(store.index_job(uuid::Uuid::new_v4()).await.is_none());
    Ok(())
}

#[tokio::test]
async fn expression_indexes_do_not_break_listing() -> LedgerResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, schema, _) = provisioned(dir.path()).await?;
    store
        .connection()
        .execute_unprepared(&format!(
            "CREATE INDEX \"manual_lower_status\" ON \"{}__transactions\" (lower(status))",
            schema.schema
        ))
        .await?;

    let physical = store.list_physical_indexes(&schema).await?;
    assert!(physical.iter().all(|index| index.name != "manual_lower_status"));
    assert!(physical.iter().any(|index| index.index.table_name == "transactions"));
    Ok(())
}
