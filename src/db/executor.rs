//! Statement execution engine.
//!
//! Runs a `Statement` against a `Target` with a timeout and returns decoded
//! rows or an affected-row count.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations
//!
//! Each submodule is generic over `sqlx::Executor`, so the same code serves a
//! pooled connection and a connection held by an open transaction.

use crate::db::pool::DbPool;
use crate::db::transaction::DbTransaction;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    DEFAULT_QUERY_TIMEOUT_SECS, DatabaseType, MAX_QUERY_TIMEOUT_SECS, QueryParam, Row, Statement,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

/// Where a statement runs: a fresh pooled connection, or the connection of
/// an already open transaction.
pub enum Target<'a> {
    Pool(&'a DbPool),
    Transaction(&'a mut DbTransaction),
}

impl Target<'_> {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            Target::Pool(pool) => pool.db_type(),
            Target::Transaction(tx) => tx.db_type(),
        }
    }

    fn acquire_timeout_secs(&self) -> u64 {
        match self {
            Target::Pool(pool) => pool.acquire_timeout_secs(),
            Target::Transaction(_) => 0,
        }
    }
}

/// Query executor that handles statement execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    default_timeout: Duration,
    verbose: bool,
}

impl QueryExecutor {
    /// Create a new query executor with default settings.
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            verbose: false,
        }
    }

    /// Create a new query executor with custom settings.
    pub fn with_defaults(timeout_secs: u64, verbose: bool) -> Self {
        Self {
            default_timeout: Duration::from_secs(timeout_secs.clamp(1, MAX_QUERY_TIMEOUT_SECS)),
            verbose,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Execute a row-returning statement.
    pub async fn fetch_all(&self, target: Target<'_>, stmt: &Statement) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let query_timeout = self.default_timeout;
        let acquire_timeout_secs = target.acquire_timeout_secs();
        let sql = stmt.sql.as_str();
        let params = stmt.params.as_slice();

        debug!(
            sql = %sql,
            params = params.len(),
            timeout_secs = query_timeout.as_secs(),
            "Executing query"
        );

        let result = match target {
            Target::Pool(pool) => match pool {
                DbPool::MySql(p) => mysql::fetch_rows(p, sql, params, query_timeout).await,
                DbPool::Postgres(p) => postgres::fetch_rows(p, sql, params, query_timeout).await,
                DbPool::SQLite(p) => sqlite::fetch_rows(p, sql, params, query_timeout).await,
            },
            Target::Transaction(tx) => match tx {
                DbTransaction::MySql(tx) => {
                    mysql::fetch_rows(&mut **tx, sql, params, query_timeout).await
                }
                DbTransaction::Postgres(tx) => {
                    postgres::fetch_rows(&mut **tx, sql, params, query_timeout).await
                }
                DbTransaction::SQLite(tx) => {
                    sqlite::fetch_rows(&mut **tx, sql, params, query_timeout).await
                }
            },
        };

        let result = result.map_err(|e| with_acquire_timeout(e, acquire_timeout_secs));
        self.log_results(stmt, result.as_ref().map(Vec::len), start);
        result
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, target: Target<'_>, stmt: &Statement) -> DbResult<u64> {
        let start = Instant::now();
        let query_timeout = self.default_timeout;
        let acquire_timeout_secs = target.acquire_timeout_secs();
        let sql = stmt.sql.as_str();
        let params = stmt.params.as_slice();

        debug!(
            sql = %sql,
            params = params.len(),
            timeout_secs = query_timeout.as_secs(),
            "Executing write operation"
        );

        let result = match target {
            Target::Pool(pool) => match pool {
                DbPool::MySql(p) => mysql::execute(p, sql, params, query_timeout).await,
                DbPool::Postgres(p) => postgres::execute(p, sql, params, query_timeout).await,
                DbPool::SQLite(p) => sqlite::execute(p, sql, params, query_timeout).await,
            },
            Target::Transaction(tx) => match tx {
                DbTransaction::MySql(tx) => {
                    mysql::execute(&mut **tx, sql, params, query_timeout).await
                }
                DbTransaction::Postgres(tx) => {
                    postgres::execute(&mut **tx, sql, params, query_timeout).await
                }
                DbTransaction::SQLite(tx) => {
                    sqlite::execute(&mut **tx, sql, params, query_timeout).await
                }
            },
        };

        let result = result.map_err(|e| with_acquire_timeout(e, acquire_timeout_secs));
        self.log_results(
            stmt,
            result.as_ref().map(|n| *n as usize),
            start,
        );
        result
    }

    /// Diagnostic record of one statement; `info` in verbose mode, `debug` otherwise.
    fn log_results(&self, stmt: &Statement, outcome: Result<usize, &DbError>, start: Instant) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match (outcome, self.verbose) {
            (Ok(rows), true) => info!(
                sql = %stmt.sql,
                params = ?stmt.params,
                rows = rows,
                elapsed_ms = elapsed_ms,
                "Statement executed"
            ),
            (Ok(rows), false) => debug!(
                sql = %stmt.sql,
                rows = rows,
                elapsed_ms = elapsed_ms,
                "Statement executed"
            ),
            (Err(e), true) => info!(
                sql = %stmt.sql,
                params = ?stmt.params,
                error = %e,
                elapsed_ms = elapsed_ms,
                "Statement failed"
            ),
            (Err(e), false) => debug!(
                sql = %stmt.sql,
                error = %e,
                elapsed_ms = elapsed_ms,
                "Statement failed"
            ),
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Pool timeouts are raised by sqlx without the configured duration.
fn with_acquire_timeout(err: DbError, acquire_timeout_secs: u64) -> DbError {
    match err {
        DbError::PoolExhausted { timeout_secs: 0 } => DbError::pool_exhausted(acquire_timeout_secs),
        other => other,
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs())
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySql;

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        // Without params, run as a plain text query (not every statement can be prepared)
        let result = if params.is_empty() {
            timeout(query_timeout, executor.fetch_all(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            timeout(query_timeout, query.fetch_all(executor)).await
        };

        match result {
            Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_row).collect()),
            Ok(Err(e)) => Err(DbError::from_statement(sql, e)),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let result = if params.is_empty() {
            timeout(query_timeout, executor.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            timeout(query_timeout, query.execute(executor)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from_statement(sql, e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::Postgres;

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let result = if params.is_empty() {
            timeout(query_timeout, executor.fetch_all(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            timeout(query_timeout, query.fetch_all(executor)).await
        };

        match result {
            Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_row).collect()),
            Ok(Err(e)) => Err(DbError::from_statement(sql, e)),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let result = if params.is_empty() {
            timeout(query_timeout, executor.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            timeout(query_timeout, query.execute(executor)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from_statement(sql, e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::Sqlite;

    pub async fn fetch_rows<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let result = if params.is_empty() {
            timeout(query_timeout, executor.fetch_all(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            timeout(query_timeout, query.fetch_all(executor)).await
        };

        match result {
            Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_row).collect()),
            Ok(Err(e)) => Err(DbError::from_statement(sql, e)),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let result = if params.is_empty() {
            timeout(query_timeout, executor.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            timeout(query_timeout, query.execute(executor)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from_statement(sql, e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }
}
