//! Background dispatcher for the `check_jobs` queue.
//!
//! Polls every `poll_interval`, claims pending jobs with
//! [`CheckJobRepo::claim_next`] (`FOR UPDATE SKIP LOCKED`, so several
//! workers can share one queue) and hands them to the [`CheckWorkerPool`].
//! A job is only claimed when a run slot is free, so claimed rows never sit
//! waiting behind a full pool.

use std::sync::Arc;
use std::time::Duration;

use dq_db::models::job::CheckJob;
use dq_db::repositories::CheckJobRepo;
use dq_db::DbPool;
use dq_pipeline::CheckWorkerPool;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Default polling interval for the dispatcher loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct CheckDispatcher {
    pool: DbPool,
    workers: Arc<CheckWorkerPool>,
    slots: Arc<Semaphore>,
    capacity: usize,
    poll_interval: Duration,
}

impl CheckDispatcher {
    pub fn new(pool: DbPool, workers: Arc<CheckWorkerPool>, max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            pool,
            workers,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Check dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Check dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.try_dispatch().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }
    }

    /// Wait until every claimed job has recorded its outcome.
    pub async fn wait_idle(&self) {
        let permits = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        let _ = self.slots.acquire_many(permits).await;
    }

    /// One dispatch cycle: claim jobs while run slots are free.
    async fn try_dispatch(&self) -> Result<(), sqlx::Error> {
        loop {
            let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
                return Ok(());
            };
            let Some(job) = CheckJobRepo::claim_next(&self.pool).await? else {
                return Ok(());
            };
            tracing::info!(
                job_id = job.id,
                check_id = job.check_id,
                triggered_by = %job.triggered_by,
                "Check job claimed",
            );
            self.start(job, slot).await?;
        }
    }

    async fn start(&self, job: CheckJob, slot: OwnedSemaphorePermit) -> Result<(), sqlx::Error> {
        let handle = match self.workers.submit_check(job.check_id) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "Worker pool rejected check job");
                return CheckJobRepo::fail(&self.pool, job.id, &e.to_string()).await;
            }
        };

        let pool = self.pool.clone();
        tokio::spawn(async move {
            let _slot = slot;
            let outcome = match handle.wait().await {
                Ok(result) => match result.error {
                    None => CheckJobRepo::complete(&pool, job.id).await,
                    Some(error) => CheckJobRepo::fail(&pool, job.id, &error).await,
                },
                Err(e) => CheckJobRepo::fail(&pool, job.id, &e.to_string()).await,
            };
            if let Err(e) = outcome {
                tracing::error!(job_id = job.id, error = %e, "Failed to record check job outcome");
            }
        });
        Ok(())
    }
}
