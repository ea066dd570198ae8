use log::{error, info, warn};
use std::collections::HashSet;

use super::job::JobOutcome;
use super::job_queue::{DrainLimits, JobQueue};
use crate::config::ProcessMode;
use crate::error::{CmsError, CmsResult};

/// Externally callable entry point that advances the queue.
///
/// Each call processes one job. In [`ProcessMode::Auto`] a successful call
/// also spawns a bounded drain in the background and returns without
/// waiting for it, so a caller (a cron hook, a webhook) stays fast.
#[derive(Clone)]
pub struct QueueTrigger {
    queue: JobQueue,
}

impl QueueTrigger {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Check `credential` against the configured secret.
    pub fn authorize(&self, credential: &str) -> CmsResult<()> {
        let Some(secret) = self.queue.config().secret.as_deref() else {
            return Err(CmsError::Authorization(
                "queue trigger has no secret configured".to_string(),
            ));
        };
        if constant_time_eq(secret.as_bytes(), credential.as_bytes()) {
            Ok(())
        } else {
            warn!("Rejected queue trigger call with a bad credential");
            Err(CmsError::Authorization("invalid queue credential".to_string()))
        }
    }

    /// Process one job. Must be called from within a tokio runtime when the
    /// queue runs in auto mode.
    pub async fn trigger(&self, credential: &str) -> CmsResult<JobOutcome> {
        self.authorize(credential)?;
        let outcome = self.queue.process_next().await?;

        if self.queue.config().mode == ProcessMode::Auto && !outcome.is_idle() {
            let mut skip = HashSet::new();
            if let JobOutcome::Failed(id, _) = &outcome {
                skip.insert(*id);
            }
            let queue = self.queue.clone();
            let limits = DrainLimits::from_config(queue.config());
            tokio::spawn(async move {
                match queue.drain_excluding(limits, skip).await {
                    Ok(report) => info!(
                        "Follow-up drain {} finished: {} succeeded, {} failed",
                        report.session,
                        report.succeeded.len(),
                        report.failed.len()
                    ),
                    Err(e) => error!("Follow-up drain failed: {}", e),
                }
            });
        }
        Ok(outcome)
    }
}

/// Equality that does not short-circuit on the first differing byte.
fn constant_time_eq(expected: &[u8], given: &[u8]) -> bool {
    if expected.len() != given.len() {
        return false;
    }
    expected
        .iter()
        .zip(given)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"s3cre"));
        assert!(constant_time_eq(b"", b""));
    }
}
