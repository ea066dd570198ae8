//! # DataFold CMS
//!
//! The data layer of a content-management system.
//!
//! ## Core Components
//!
//! * `schema` - Field types, collection definitions, conditional logic and the schema registry
//! * `query` - Query descriptors, the string parameter parser, the compiler, relation population and mutations
//! * `queue` - Persistent job queue with staged handlers and an external trigger
//! * `db_operations` - sled-backed storage of records, unique indexes and jobs
//! * `config` - TOML configuration with environment overrides
//! * `logging` - `env_logger` setup for binaries and tests
//!
//! ## Architecture
//!
//! Collections are declared once at startup and loaded into a read-only
//! [`SchemaRegistry`]. Every read or write starts as a [`QueryDescriptor`],
//! built fluently through [`QueryBuilder`] or parsed from request parameters,
//! and is compiled against the registry before storage is touched. Deferred
//! work (such as translating a record) is enqueued on the [`JobQueue`] and
//! run later through its handler pipeline.

pub mod cms;
pub mod config;
pub mod context;
pub mod db_operations;
pub mod error;
pub mod logging;
pub mod query;
pub mod queue;
pub mod record;
pub mod schema;

// Re-export main types for convenience
pub use cms::Cms;
pub use config::{CmsConfig, ProcessMode, QueryConfig, QueueConfig};
pub use context::{CancellationFlag, OperationContext, UserContext};
pub use db_operations::DbOperations;
pub use error::{CmsError, CmsResult, FieldViolation, ValidationErrors, ViolationKind};
pub use query::{
    Document, FilterExpr, FilterGroup, Operator, Paginated, PopulateSpec, QueryBuilder, QueryDescriptor,
    QueryEngine, Selection, SortDirection,
};
pub use queue::{
    DrainLimits, DrainReport, Job, JobHandler, JobOutcome, JobQueue, JobRegistry, JobTarget, QueueTrigger,
};
pub use record::Record;
pub use schema::{
    Collection, CollectionDefinition, CollectionMode, ConditionExpr, FieldDefinition, FieldKind, SchemaError,
    SchemaRegistry,
};
