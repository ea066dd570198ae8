//! Persistent FIFO of deferred jobs.
//!
//! Jobs live in the `jobs` tree keyed by creation time then id. A job is
//! claimed by inserting its id into the queue's in-memory claim set under a
//! lock; the row stays in storage until every stage succeeds, so a crash or
//! a failing handler never loses it.

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::job::{Job, JobExecutionError, JobId, JobOutcome, JobTarget};
use super::pipeline::{JobPipeline, JobRegistry};
use crate::config::QueueConfig;
use crate::db_operations::DbOperations;
use crate::error::{CmsError, CmsResult};
use crate::schema::SchemaRegistry;

/// Bounds on one drain session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainLimits {
    pub max_iterations: u32,
    pub max_duration: Duration,
}

impl DrainLimits {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_duration: config.max_duration(),
        }
    }
}

/// What one drain session did.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub session: Uuid,
    pub succeeded: Vec<JobId>,
    pub failed: Vec<JobExecutionError>,
    /// No claimable job was left when the session stopped
    pub exhausted: bool,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    db: DbOperations,
    schemas: Arc<SchemaRegistry>,
    handlers: JobRegistry,
    config: QueueConfig,
    claimed: Mutex<HashSet<JobId>>,
}

impl QueueInner {
    fn claims(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on one job; released on drop.
struct Claim {
    inner: Arc<QueueInner>,
    job: Job,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner.claims().remove(&self.job.id);
    }
}

impl JobQueue {
    pub fn new(
        db: DbOperations,
        schemas: Arc<SchemaRegistry>,
        handlers: JobRegistry,
        config: QueueConfig,
    ) -> Self {
        info!("Job queue ready with actions {:?}", handlers.actions());
        Self {
            inner: Arc::new(QueueInner {
                db,
                schemas,
                handlers,
                config,
                claimed: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn handlers(&self) -> &JobRegistry {
        &self.inner.handlers
    }

    /// Persist a new job. Never runs anything.
    pub fn enqueue(&self, action: impl Into<String>, target: JobTarget, payload: Option<Value>) -> CmsResult<JobId> {
        let action = action.into();
        if action.trim().is_empty() {
            return Err(CmsError::InvalidQuery("job action must not be empty".to_string()));
        }
        match (&target.collection, target.record_id) {
            (Some(collection), _) => {
                self.inner.schemas.collection(collection)?;
            }
            (None, Some(_)) => {
                return Err(CmsError::InvalidQuery(
                    "a job targeting a record must name its collection".to_string(),
                ));
            }
            (None, None) => {}
        }
        if !self.inner.handlers.contains(&action) {
            warn!("Enqueuing job for unregistered action '{}'", action);
        }

        let job = Job {
            id: self.inner.db.generate_id()?,
            action,
            target_collection: target.collection,
            target_record_id: target.record_id,
            payload,
            created_at: Utc::now(),
        };
        self.inner.db.insert_job(&job)?;
        debug!("Enqueued job {} ({})", job.id, job.action);
        Ok(job.id)
    }

    /// Claim the oldest pending job and run it.
    ///
    /// Concurrent callers never receive the same job: the claim is taken
    /// under the queue lock, and a job already claimed is skipped.
    pub async fn process_next(&self) -> CmsResult<JobOutcome> {
        self.process_excluding(&HashSet::new()).await
    }

    async fn process_excluding(&self, skip: &HashSet<JobId>) -> CmsResult<JobOutcome> {
        let Some(claim) = self.claim(skip)? else {
            return Ok(JobOutcome::Idle);
        };
        let job = &claim.job;
        info!("Claimed job {} ({})", job.id, job.action);

        let result = JobPipeline::new(job, &self.inner.handlers)
            .run(self.inner.config.job_timeout())
            .await;
        match result {
            Ok(()) => {
                self.inner.db.remove_job(job)?;
                info!("Job {} ({}) succeeded", job.id, job.action);
                Ok(JobOutcome::Succeeded(job.id))
            }
            Err(e) => {
                error!(
                    "Job {} ({}) failed during {}: {}",
                    e.job_id, e.action, e.stage, e.message
                );
                Ok(JobOutcome::Failed(job.id, e))
            }
        }
    }

    fn claim(&self, skip: &HashSet<JobId>) -> CmsResult<Option<Claim>> {
        let mut claimed = self.inner.claims();
        let job = self
            .inner
            .db
            .first_job_where(|job| !claimed.contains(&job.id) && !skip.contains(&job.id))?;
        Ok(job.map(|job| {
            claimed.insert(job.id);
            Claim {
                inner: Arc::clone(&self.inner),
                job,
            }
        }))
    }

    /// Process jobs until the queue is empty or `limits` is reached.
    ///
    /// A job that fails is not claimed again in the same session.
    pub async fn drain(&self, limits: DrainLimits) -> CmsResult<DrainReport> {
        self.drain_excluding(limits, HashSet::new()).await
    }

    pub(crate) async fn drain_excluding(
        &self,
        limits: DrainLimits,
        mut skip: HashSet<JobId>,
    ) -> CmsResult<DrainReport> {
        let started = Instant::now();
        let mut report = DrainReport {
            session: Uuid::new_v4(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            exhausted: false,
        };
        debug!("Drain session {} started", report.session);

        for _ in 0..limits.max_iterations {
            if started.elapsed() >= limits.max_duration {
                break;
            }
            match self.process_excluding(&skip).await? {
                JobOutcome::Idle => {
                    report.exhausted = true;
                    break;
                }
                JobOutcome::Succeeded(id) => report.succeeded.push(id),
                JobOutcome::Failed(id, e) => {
                    skip.insert(id);
                    report.failed.push(e);
                }
            }
        }

        info!(
            "Drain session {} processed {} job(s): {} succeeded, {} failed",
            report.session,
            report.processed(),
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.db.job_count()
    }

    /// Every job row still stored, oldest first.
    pub fn list_pending(&self) -> CmsResult<Vec<Job>> {
        self.inner.db.list_jobs()
    }

    pub fn get(&self, id: JobId) -> CmsResult<Option<Job>> {
        self.inner.db.get_job(id)
    }

    /// Delete a job row by hand. A job that is running cannot be removed.
    pub fn remove(&self, id: JobId) -> CmsResult<bool> {
        let claimed = self.inner.claims();
        if claimed.contains(&id) {
            return Err(CmsError::Conflict(format!("job {} is being processed", id)));
        }
        match self.inner.db.get_job(id)? {
            Some(job) => {
                let removed = self.inner.db.remove_job(&job)?;
                info!("Removed job {} ({})", job.id, job.action);
                Ok(removed)
            }
            None => Ok(false),
        }
    }
}
