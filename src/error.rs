//! Error types for metamapper.
//!
//! All failures surface to the immediate caller as a `DbError`; nothing is
//! swallowed or retried inside the library.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Query failed: {message} (sql: {sql})")]
    Query {
        sql: String,
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
    },

    #[error("Unable to allocate id from sequence '{sequence}': {message}")]
    Allocation { sequence: String, message: String },

    #[error("Transaction error: {message} (batch: {batch_id})")]
    Transaction { message: String, batch_id: String },

    #[error("Connection pool exhausted: no connection available within {timeout_secs}s")]
    PoolExhausted { timeout_secs: u64 },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error for a statement the database rejected.
    pub fn query(
        sql: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Query {
            sql: sql.into(),
            message: message.into(),
            sql_state,
        }
    }

    pub fn allocation(sequence: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Allocation {
            sequence: sequence.into(),
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            batch_id: batch_id.into(),
        }
    }

    pub fn pool_exhausted(timeout_secs: u64) -> Self {
        Self::PoolExhausted { timeout_secs }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convert a driver error raised while running `sql`.
    ///
    /// Pool acquisition failures keep their own category; everything else the
    /// driver reports becomes a `Query` error carrying the statement text.
    pub fn from_statement(sql: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::pool_exhausted(0),
            sqlx::Error::PoolClosed => {
                Self::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                Self::query(sql, db_err.message(), code)
            }
            other => Self::query(sql, other.to_string(), None),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Increase max_connections or acquire_timeout, or reduce concurrent load")
            }
            Self::Query { .. } => Some("Check the SQL syntax and referenced objects"),
            _ => None,
        }
    }

    /// Check if the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::PoolExhausted { .. }
                | Self::Allocation { .. }
        )
    }
}

/// Convert sqlx errors raised outside of a specific statement.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query("", db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted(0),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_query_error_carries_sql() {
        let err = DbError::query("SELECT * FROM USERS", "no such table", None);
        assert!(err.to_string().contains("SELECT * FROM USERS"));
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::pool_exhausted(30).is_retryable());
        assert!(DbError::allocation("ID_SEQ", "empty").is_retryable());
        assert!(!DbError::query("x", "syntax", None).is_retryable());
        assert!(!DbError::transaction("commit failed", "batch_1").is_retryable());
    }

    #[test]
    fn test_from_statement_maps_pool_timeout() {
        let err = DbError::from_statement("SELECT 1", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::PoolExhausted { .. }));
    }

    #[test]
    fn test_from_statement_keeps_sql() {
        let err = DbError::from_statement("DELETE FROM T", sqlx::Error::RowNotFound);
        match err {
            DbError::Query { sql, .. } => assert_eq!(sql, "DELETE FROM T"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_suggestion() {
        assert_eq!(
            DbError::connection("x", "Check credentials").suggestion(),
            Some("Check credentials")
        );
        assert!(DbError::invalid_input("bad").suggestion().is_none());
    }
}
