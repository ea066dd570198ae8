//! Deferred job processing: persisted jobs, the handler pipeline that runs
//! them, and the trigger that advances the queue from outside.

pub mod handlers;
pub mod job;
pub mod job_queue;
pub mod pipeline;
pub mod trigger;

pub use handlers::{TranslationJob, TRANSLATION_ACTION};
pub use job::{Job, JobExecutionError, JobId, JobOutcome, JobTarget};
pub use job_queue::{DrainLimits, DrainReport, JobQueue};
pub use pipeline::{HandlerError, HandlerResult, JobHandler, JobPipeline, JobRegistry, JobStage};
pub use trigger::QueueTrigger;
