//! Data models for metamapper.
//!
//! This module re-exports all model types used throughout the crate.

pub mod batch;
pub mod connection;
pub mod entity;
pub mod query;

// Re-export commonly used types
pub use batch::{BatchOp, OpKind, TransactionBatch};
pub use connection::{DatabaseType, masked_connection_string};
pub use entity::{
    Entity, EntityMetadata, FieldAccessors, SEQUENCE_DATA, TableMetadata, map_to_patch,
    merge_patch,
};
pub use query::{
    DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS, QueryParam, Row, Statement,
    integer_column, row_into, rows_into,
};
