//! Per-call operation context: who is acting, and until when.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CmsError, CmsResult};

/// The authenticated user performing an operation, used for author fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserContext {
    pub fn new(id: u64) -> Self {
        Self { id, name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Shared cancellation switch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context threaded through queries, mutations and population.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub user: Option<UserContext>,
    pub deadline: Option<Instant>,
    pub cancellation: Option<CancellationFlag>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    pub fn user_id(&self) -> Option<u64> {
        self.user.as_ref().map(|u| u.id)
    }

    /// Fails with `Cancelled` once the deadline has passed or the flag is set.
    ///
    /// Called at every storage boundary; inside a transaction the error aborts
    /// and rolls back everything written so far.
    pub fn check(&self) -> CmsResult<()> {
        if self.cancellation.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(CmsError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CmsError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let ctx = OperationContext::new().with_cancellation(flag.clone());
        assert!(ctx.check().is_ok());

        flag.cancel();
        assert!(matches!(ctx.check(), Err(CmsError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let ctx = OperationContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(CmsError::Cancelled)));
    }
}
