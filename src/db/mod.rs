//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Metadata-driven statement building
//! - Statement execution on a pool or an open transaction
//! - CRUD operations and atomic write batches
//! - Cached sequence id allocation
//! - Row decoding and parameter binding

pub mod crud;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod sequence;
pub mod statement;
pub mod transaction;
pub mod types;

pub use crud::CrudEngine;
pub use executor::{QueryExecutor, Target};
pub use pool::DbPool;
pub use sequence::{DbSequenceSource, SequenceAllocator, SequenceSource};
pub use statement::{COUNT_COLUMN, ID_LIST_SENTINEL, StatementBuilder, check_identifier};
pub use transaction::DbTransaction;
