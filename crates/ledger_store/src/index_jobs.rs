//! Background worker that builds requested indexes one job at a time.
//!
//! Requests return a job id immediately; the build runs on a detached task
//! that callers cannot cancel, bounded by a per-job timeout. Outcomes are
//! recorded on the job and logged, never returned to the requester.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use sea_orm::DatabaseConnection;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::indexes::create_index;
use vigil_ledger_core::{
    ConcreteIndex, DatabaseSchema, IndexJobStatus, IndexJobSummary, LedgerError, LedgerResult,
};

const MAX_JOB_HISTORY: usize = 256;

struct IndexJob {
    id: Uuid,
    schema: DatabaseSchema,
    indexes: Vec<ConcreteIndex>,
}

struct TrackedJob {
    summary: IndexJobSummary,
    status_tx: watch::Sender<IndexJobStatus>,
}

#[derive(Default)]
struct JobBook {
    jobs: HashMap<Uuid, TrackedJob>,
    order: VecDeque<Uuid>,
}

impl JobBook {
    fn insert(&mut self, summary: IndexJobSummary) {
        let (status_tx, _) = watch::channel(summary.status.clone());
        self.order.push_back(summary.job_id);
        self.jobs.insert(summary.job_id, TrackedJob { summary, status_tx });
        self.evict();
    }

    /// Drops the oldest finished jobs once the history is over capacity.
    /// Unfinished jobs are never evicted.
    fn evict(&mut self) {
        while self.order.len() > MAX_JOB_HISTORY {
            let position = self.order.iter().position(|id| {
                self.jobs
                    .get(id)
                    .is_none_or(|job| job.summary.status.is_finished())
            });
            let Some(position) = position else {
                break;
            };
            if let Some(id) = self.order.remove(position) {
                self.jobs.remove(&id);
            }
        }
    }

    fn set_status(&mut self, id: Uuid, status: IndexJobStatus) {
        if let Some(job) = self.jobs.get_mut(&id) {
            if status.is_finished() {
                job.summary.finished_at = Some(Utc::now());
            }
            job.summary.status = status.clone();
            job.status_tx.send_replace(status);
        }
    }
}

#[derive(Clone)]
pub struct IndexJobQueue {
    sender: mpsc::Sender<IndexJob>,
    book: Arc<Mutex<JobBook>>,
}

impl IndexJobQueue {
    /// Starts the worker on the current tokio runtime. It stops once every
    /// queue handle is dropped and the backlog is drained.
    pub fn spawn(conn: DatabaseConnection, capacity: usize, build_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let book = Arc::new(Mutex::new(JobBook::default()));
        tokio::spawn(run_worker(conn, receiver, book.clone(), build_timeout));
        Self { sender, book }
    }

    pub fn enqueue(&self, schema: &DatabaseSchema, indexes: Vec<ConcreteIndex>) -> Uuid {
        let id = Uuid::new_v4();
        self.with_book(|book| {
            book.insert(IndexJobSummary {
                job_id: id,
                schema: schema.schema.clone(),
                indexes: indexes.clone(),
                status: IndexJobStatus::Queued,
                created_at: Utc::now(),
                finished_at: None,
            })
        });

        let count = indexes.len();
        let job = IndexJob {
            id,
            schema: schema.clone(),
            indexes,
        };
        match self.sender.try_send(job) {
            Ok(()) => debug!("index_jobs: queued {id} with {count} indexes for {}", schema.schema),
            Err(err) => {
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "index job queue is full",
                    mpsc::error::TrySendError::Closed(_) => "index worker has stopped",
                };
                error!("index_jobs: rejected {id} for {}: {reason}", schema.schema);
                self.with_book(|book| {
                    book.set_status(id, IndexJobStatus::Failed(reason.to_string()))
                });
            }
        }
        id
    }

    pub fn summary(&self, id: Uuid) -> Option<IndexJobSummary> {
        self.with_book(|book| book.jobs.get(&id).map(|job| job.summary.clone()))
            .flatten()
    }

    /// Known jobs, oldest first.
    pub fn summaries(&self) -> Vec<IndexJobSummary> {
        self.with_book(|book| {
            book.order
                .iter()
                .filter_map(|id| book.jobs.get(id).map(|job| job.summary.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Resolves once the job reaches a terminal status.
    pub async fn wait(&self, id: Uuid) -> LedgerResult<IndexJobStatus> {
        let mut status_rx = self
            .with_book(|book| book.jobs.get(&id).map(|job| job.status_tx.subscribe()))
            .flatten()
            .ok_or_else(|| LedgerError::not_found(format!("index job {id}")))?;
        let status = status_rx
            .wait_for(IndexJobStatus::is_finished)
            .await
            .map_err(|_| LedgerError::processing(format!("index job {id} was dropped")))?;
        Ok(status.clone())
    }

    fn with_book<T>(&self, f: impl FnOnce(&mut JobBook) -> T) -> Option<T> {
        match self.book.lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(_) => {
                warn!("index_jobs: job book poisoned");
                None
            }
        }
    }
}

async fn run_worker(
    conn: DatabaseConnection,
    mut receiver: mpsc::Receiver<IndexJob>,
    book: Arc<Mutex<JobBook>>,
    build_timeout: Duration,
) {
    let set_status = |id: Uuid, status: IndexJobStatus| {
        if let Ok(mut guard) = book.lock() {
            guard.set_status(id, status);
        }
    };

    while let Some(job) = receiver.recv().await {
        set_status(job.id, IndexJobStatus::Running);
        let status = match tokio::time::timeout(build_timeout, build_all(&conn, &job)).await {
            Ok(Ok(())) => {
                info!(
                    "index_jobs: {} built {} indexes for {}",
                    job.id,
                    job.indexes.len(),
                    job.schema.schema
                );
                IndexJobStatus::Succeeded
            }
            Ok(Err(err)) => {
                error!("index_jobs: {} failed for {}: {err}", job.id, job.schema.schema);
                IndexJobStatus::Failed(err.to_string())
            }
            Err(_) => {
                error!(
                    "index_jobs: {} timed out after {}s for {}",
                    job.id,
                    build_timeout.as_secs(),
                    job.schema.schema
                );
                IndexJobStatus::TimedOut
            }
        };
        set_status(job.id, status);
    }
    debug!("index_jobs: worker stopped");
}

/// Builds sequentially: concurrent builds on the same table can deadlock.
async fn build_all(conn: &DatabaseConnection, job: &IndexJob) -> LedgerResult<()> {
    for index in &job.indexes {
        create_index(conn, &job.schema, index).await?;
    }
    Ok(())
}
