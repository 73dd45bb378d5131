//! Database Core Error Types

use thiserror::Error;

/// Top-level errors for the database queue subsystem
#[derive(Error, Debug)]
pub enum DbError {
    /// Database name was empty or unknown
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    /// Empty database name at queue creation
    #[error("Database name must not be empty")]
    EmptyDatabaseName,

    /// Empty connection string at queue creation
    #[error("Connection string must not be empty")]
    EmptyConnectionString,

    /// No engine registered for the requested kind
    #[error("No engine registered for '{0}'")]
    EngineNotRegistered(String),

    /// Engine failed to establish a connection
    #[error("Connection failed for '{designator}': {reason}")]
    ConnectionFailed { designator: String, reason: String },

    /// Connection pool has no free slot and is at capacity
    #[error("Connection pool exhausted for database '{0}'")]
    PoolExhausted(String),

    /// Queue was asked to do work after shutdown was requested
    #[error("Queue '{0}' is shutting down")]
    ShuttingDown(String),

    /// Query reference not present in the query table cache
    #[error("Query ref {0} not found")]
    QueryRefNotFound(i64),

    /// Submission channel was closed (worker already gone)
    #[error("Queue '{0}' is no longer accepting queries")]
    QueueClosed(String),

    /// Waiting on a pending result hit its deadline
    #[error("Timed out waiting for query '{0}'")]
    PendingTimeout(String),

    /// Cache-level failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Parameter conversion/binding failure
    #[error(transparent)]
    Params(#[from] ParamError),

    /// Configuration loading failure
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors from the query table cache
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    /// An entry with this query_ref and query_type already exists
    #[error("Duplicate query_ref {query_ref} (type {query_type}) in cache")]
    DuplicateQueryRef { query_ref: i64, query_type: i32 },
}

/// Errors from named-parameter conversion and binding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParamError {
    /// SQL template names a parameter the request did not supply
    #[error("Missing value for parameter ':{0}'")]
    MissingParameter(String),

    /// The params payload was not a JSON object
    #[error("Parameters must be a JSON object, got {0}")]
    NotAnObject(String),

    /// Parameter value type has no SQL binding
    #[error("Unsupported value type for parameter ':{0}'")]
    UnsupportedType(String),
}

/// Errors from request-batch deduplication
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DedupError {
    /// The target database has no configuration entry
    #[error("Database connection not found: {0}")]
    DatabaseNotFound(String),

    /// Unique query count exceeds the database's per-request limit
    #[error("Rate limit exceeded: {unique} unique queries > {max} max for database {database}")]
    RateLimit {
        unique: usize,
        max: usize,
        database: String,
    },
}

/// Result type for database core operations
pub type DbResult<T> = Result<T, DbError>;
