// Core database operations
pub mod core;

pub use core::{DbOperations, RecordTxn, TxResult};
