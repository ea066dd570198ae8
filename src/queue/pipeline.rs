//! Handler hooks and the stage machine that runs them.
//!
//! A claimed job moves through `Dispatch -> BeforeProcess -> Callback ->
//! AfterProcess -> Completed`. The first stage that fails (or runs past the
//! job's deadline) stops the machine and is reported in the error.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use super::job::{Job, JobExecutionError};

/// Error a handler hook may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

/// Work registered for one job action.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs before `callback`; a failure skips the callback.
    async fn before_process(&self, _job: &Job) -> HandlerResult {
        Ok(())
    }

    async fn callback(&self, job: &Job) -> HandlerResult;

    /// Runs after a successful `callback`.
    async fn after_process(&self, _job: &Job) -> HandlerResult {
        Ok(())
    }
}

/// Action name to handler, fixed once the queue is built.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any earlier one.
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(action.into(), handler);
        self
    }

    pub fn with(mut self, action: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.register(action, handler);
        self
    }

    pub fn get(&self, action: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStage {
    /// Resolving the handler for the job's action
    Dispatch,
    BeforeProcess,
    Callback,
    AfterProcess,
    Completed,
}

impl JobStage {
    pub fn next(self) -> Self {
        match self {
            Self::Dispatch => Self::BeforeProcess,
            Self::BeforeProcess => Self::Callback,
            Self::Callback => Self::AfterProcess,
            Self::AfterProcess | Self::Completed => Self::Completed,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dispatch => "dispatch",
            Self::BeforeProcess => "beforeProcess",
            Self::Callback => "callback",
            Self::AfterProcess => "afterProcess",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// One run of a claimed job through its handler.
pub struct JobPipeline<'a> {
    job: &'a Job,
    registry: &'a JobRegistry,
    stage: JobStage,
}

impl<'a> JobPipeline<'a> {
    pub fn new(job: &'a Job, registry: &'a JobRegistry) -> Self {
        Self {
            job,
            registry,
            stage: JobStage::Dispatch,
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Drive the job to `Completed`. `timeout` bounds the whole run.
    pub async fn run(mut self, timeout: Duration) -> Result<(), JobExecutionError> {
        let deadline = Instant::now() + timeout;
        let handler = match self.registry.get(&self.job.action) {
            Some(handler) => Arc::clone(handler),
            None => {
                return Err(self.fail(format!("no handler registered for action '{}'", self.job.action)));
            }
        };
        self.stage = self.stage.next();

        while self.stage != JobStage::Completed {
            debug!("Job {} ({}) entering {}", self.job.id, self.job.action, self.stage);
            let step = match self.stage {
                JobStage::BeforeProcess => handler.before_process(self.job),
                JobStage::Callback => handler.callback(self.job),
                JobStage::AfterProcess => handler.after_process(self.job),
                JobStage::Dispatch | JobStage::Completed => break,
            };
            match timeout_at(deadline, step).await {
                Ok(Ok(())) => self.stage = self.stage.next(),
                Ok(Err(e)) => return Err(self.fail(e.to_string())),
                Err(_) => return Err(self.fail(format!("timed out after {}ms", timeout.as_millis()))),
            }
        }
        Ok(())
    }

    fn fail(&self, message: String) -> JobExecutionError {
        JobExecutionError {
            job_id: self.job.id,
            action: self.job.action.clone(),
            stage: self.stage,
            message,
        }
    }
}
