//! Bounded asynchronous execution of checks.
//!
//! [`CheckWorkerPool::submit_check`] enqueues a run and returns a
//! [`JobHandle`] immediately. A dispatcher task feeds queued jobs to at most
//! `max_concurrent` concurrent executions. Cancelling the pool stops
//! dispatch; jobs already running finish, queued ones are marked cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dq_core::result::CheckResult;
use dq_core::types::{DbId, Timestamp};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::service::{CheckService, ServiceError};

/// Finished records kept before the ledger starts pruning them.
const LEDGER_CAPACITY: usize = 10_000;

// ---------------------------------------------------------------------------
// Job ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub check_id: DbId,
    pub status: JobStatus,
    pub submitted_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub error: Option<String>,
}

#[derive(Default)]
struct JobLedger {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
}

impl JobLedger {
    fn insert(&self, job_id: Uuid, check_id: DbId) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.len() >= LEDGER_CAPACITY {
            jobs.retain(|_, r| !r.status.is_terminal());
        }
        jobs.insert(
            job_id,
            JobRecord {
                job_id,
                check_id,
                status: JobStatus::Pending,
                submitted_at: Utc::now(),
                finished_at: None,
                error: None,
            },
        );
    }

    fn mark(&self, job_id: Uuid, status: JobStatus, error: Option<String>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = jobs.get_mut(&job_id) {
            record.status = status;
            if status.is_terminal() {
                record.finished_at = Some(Utc::now());
            }
            record.error = error;
        }
    }

    fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A submitted run. Dropping the handle does not cancel the job.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub check_id: DbId,
    reply: oneshot::Receiver<Result<CheckResult, ServiceError>>,
}

impl JobHandle {
    /// Wait for the job's result.
    pub async fn wait(self) -> Result<CheckResult, ServiceError> {
        self.reply.await.unwrap_or(Err(ServiceError::Cancelled))
    }
}

struct QueuedJob {
    job_id: Uuid,
    check_id: DbId,
    reply: oneshot::Sender<Result<CheckResult, ServiceError>>,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct CheckWorkerPool {
    sender: mpsc::UnboundedSender<QueuedJob>,
    ledger: Arc<JobLedger>,
    cancel: CancellationToken,
}

impl CheckWorkerPool {
    /// Spawn the dispatcher task. Must be called within a Tokio runtime.
    pub fn start(service: Arc<CheckService>, max_concurrent: usize, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let ledger = Arc::new(JobLedger::default());
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

        tracing::info!(max_concurrent, "Check worker pool started");
        tokio::spawn(Self::dispatch(
            service,
            receiver,
            permits,
            Arc::clone(&ledger),
            cancel.clone(),
        ));

        Self {
            sender,
            ledger,
            cancel,
        }
    }

    /// Queue a run of `check_id`.
    pub fn submit_check(&self, check_id: DbId) -> Result<JobHandle, ServiceError> {
        if self.cancel.is_cancelled() {
            return Err(ServiceError::ShuttingDown);
        }
        let job_id = Uuid::now_v7();
        let (reply, rx) = oneshot::channel();

        self.ledger.insert(job_id, check_id);
        if self
            .sender
            .send(QueuedJob {
                job_id,
                check_id,
                reply,
            })
            .is_err()
        {
            self.ledger.mark(job_id, JobStatus::Cancelled, None);
            return Err(ServiceError::ShuttingDown);
        }

        tracing::debug!(%job_id, check_id, "Check job queued");
        Ok(JobHandle {
            job_id,
            check_id,
            reply: rx,
        })
    }

    /// Current ledger entry for a job.
    pub fn job(&self, job_id: Uuid) -> Option<JobRecord> {
        self.ledger.get(job_id)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn dispatch(
        service: Arc<CheckService>,
        mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
        permits: Arc<Semaphore>,
        ledger: Arc<JobLedger>,
        cancel: CancellationToken,
    ) {
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    ledger.mark(job.job_id, JobStatus::Cancelled, None);
                    break;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let service = Arc::clone(&service);
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                let _permit = permit;
                ledger.mark(job.job_id, JobStatus::Running, None);

                let outcome = service.execute_check(job.check_id).await;
                match &outcome {
                    Ok(result) if result.error.is_none() => {
                        ledger.mark(job.job_id, JobStatus::Completed, None);
                    }
                    Ok(result) => {
                        ledger.mark(job.job_id, JobStatus::Failed, result.error.clone());
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job.job_id, check_id = job.check_id, error = %e, "Check job failed");
                        ledger.mark(job.job_id, JobStatus::Failed, Some(e.to_string()));
                    }
                }
                // The submitter may have dropped its handle.
                let _ = job.reply.send(outcome);
            });
        }

        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            ledger.mark(job.job_id, JobStatus::Cancelled, None);
        }
        tracing::info!("Check worker pool stopped dispatching");
    }
}
