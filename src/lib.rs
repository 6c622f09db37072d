//! metamapper library
//!
//! Metadata-driven CRUD over SQL databases (MySQL, PostgreSQL, SQLite):
//! parameterized statements generated from per-table metadata, atomic write
//! batches, and sequence ids handed out from a local cache.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;

pub use config::Config;
pub use db::{CrudEngine, DbPool, SequenceAllocator};
pub use error::{DbError, DbResult};
pub use queue::Queue;
