//! Query layer: descriptors built fluently or parsed from request
//! parameters, compiled against the schema, then executed over the store.

pub mod builder;
pub mod compiler;
pub mod descriptor;
pub mod engine;
pub mod filter;
mod mutation;
pub mod parser;
pub mod populate;

pub use builder::{FilterGroup, Paginated, QueryBuilder};
pub use compiler::{compile, CompiledQuery};
pub use descriptor::{Pagination, PopulateSpec, QueryDescriptor, Selection, Selector, SortDirection, SortKey};
pub use engine::{Document, QueryEngine, SINGLE_RECORD_ID};
pub use filter::{FilterExpr, Operator, Predicate};
pub use parser::{parse_params, ParseError};
pub use populate::PopulationEngine;
