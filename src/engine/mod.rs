//! Database Engine Abstraction
//!
//! A single trait pair replaces the per-engine function-pointer tables of a
//! classic C driver layer:
//!
//! - [`DatabaseEngine`]: one registered implementation per engine kind,
//!   responsible only for opening connections.
//! - [`EngineConnection`]: a live connection. Execute, prepare/unprepare,
//!   health check, and transaction control all happen here.
//!
//! Wire protocols are out of scope for this crate. Real engines (PostgreSQL,
//! MySQL, SQLite, DB2) are external collaborators implementing these traits;
//! the in-tree [`mock::MockEngine`] is the reference implementation used by
//! tests and demos.
//!
//! Every call returns an explicit `Result`; the queue layer never interprets
//! an engine failure as fatal to the process.

pub mod mock;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connstring::ConnectionConfig;
use crate::prepared::PreparedStatementCache;

/// Supported database engine kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    Mysql,
    Sqlite,
    Db2,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Db2 => write!(f, "db2"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            "sqlite" => Ok(Self::Sqlite),
            "db2" => Ok(Self::Db2),
            _ => Err(format!(
                "Unknown engine kind: '{s}'. Valid options: postgres, mysql, sqlite, db2"
            )),
        }
    }
}

/// Opaque identifier for a natively prepared statement.
///
/// Issued by an [`EngineConnection`] on prepare and passed back on execute
/// and unprepare. The prepared-statement LRU cache stores these rather than
/// engine-specific pointers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// A query handed to an engine for execution
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Positional-parameter SQL (already converted from named form)
    pub sql: String,
    /// Parameter values in placeholder order
    pub params: Vec<serde_json::Value>,
    /// Execute via this prepared statement instead of direct SQL
    pub prepared: Option<StatementId>,
    pub timeout: Duration,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        QueryRequest {
            sql: sql.into(),
            params: Vec::new(),
            prepared: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_params(mut self, params: Vec<serde_json::Value>) -> Self {
        self.params = params;
        self
    }
}

/// The outcome of one executed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    /// Rows as a JSON array of objects (engine-normalized)
    pub data: serde_json::Value,
    pub row_count: usize,
    pub column_names: Vec<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub affected_rows: u64,
}

impl QueryResult {
    /// An empty successful result
    pub fn ok() -> Self {
        QueryResult {
            success: true,
            data: serde_json::Value::Array(Vec::new()),
            row_count: 0,
            column_names: Vec::new(),
            error_message: None,
            execution_time_ms: 0,
            affected_rows: 0,
        }
    }

    /// A failed result carrying an engine error message
    pub fn failed(message: impl Into<String>) -> Self {
        QueryResult {
            success: false,
            data: serde_json::Value::Null,
            row_count: 0,
            column_names: Vec::new(),
            error_message: Some(message.into()),
            execution_time_ms: 0,
            affected_rows: 0,
        }
    }
}

/// Errors surfaced by engine implementations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("execute failed: {0}")]
    Execute(String),
    #[error("prepare failed: {0}")]
    Prepare(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// Factory for connections to one engine kind
pub trait DatabaseEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Open a new connection. `designator` is a logging label only.
    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError>;
}

/// A live connection to one engine
pub trait EngineConnection: Send {
    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult, EngineError>;

    /// Prepare a statement natively, returning an opaque id
    fn prepare(&mut self, name: &str, sql: &str) -> Result<StatementId, EngineError>;

    /// Close a natively prepared statement. Unknown ids are ignored.
    fn unprepare(&mut self, id: StatementId);

    /// Lightweight liveness probe (e.g. `SELECT 1`)
    fn health_check(&mut self) -> bool;

    fn begin_transaction(&mut self) -> Result<(), EngineError>;
    fn commit(&mut self) -> Result<(), EngineError>;
    fn rollback(&mut self) -> Result<(), EngineError>;
}

/// Registry of engines, owned by the subsystem (no global state)
#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: Vec<std::sync::Arc<dyn DatabaseEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        EngineRegistry {
            engines: Vec::new(),
        }
    }

    /// Register an engine. A later registration for the same kind wins.
    pub fn register(&mut self, engine: std::sync::Arc<dyn DatabaseEngine>) {
        self.engines.retain(|e| e.kind() != engine.kind());
        self.engines.push(engine);
    }

    pub fn get(&self, kind: EngineKind) -> Option<std::sync::Arc<dyn DatabaseEngine>> {
        self.engines
            .iter()
            .find(|e| e.kind() == kind)
            .cloned()
    }
}

/// Connection status tracked on a handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// A live connection plus its per-connection bookkeeping.
///
/// Owned exclusively by whichever queue or pool entry holds it at a time.
/// Callers serialize access through the `Mutex` the owner wraps around it;
/// the handle itself only guards prepared-statement bookkeeping.
pub struct DatabaseHandle {
    connection: Box<dyn EngineConnection>,
    pub engine_kind: EngineKind,
    pub status: ConnectionStatus,
    /// Logging label, e.g. "DQM-acuranzo-00-LSMFC"
    pub designator: String,
    pub connected_since: chrono::DateTime<chrono::Utc>,
    prepared: PreparedStatementCache<StatementId>,
    pub consecutive_failures: u32,
}

impl DatabaseHandle {
    pub fn new(
        connection: Box<dyn EngineConnection>,
        engine_kind: EngineKind,
        designator: &str,
        prepared_capacity: usize,
    ) -> Self {
        DatabaseHandle {
            connection,
            engine_kind,
            status: ConnectionStatus::Connected,
            designator: designator.to_string(),
            connected_since: chrono::Utc::now(),
            prepared: PreparedStatementCache::new(prepared_capacity),
            consecutive_failures: 0,
        }
    }

    pub fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult, EngineError> {
        self.connection.execute(request)
    }

    /// Prepare through the LRU cache: a cache hit bumps the entry and reuses
    /// the native statement; a miss prepares natively, evicting (and natively
    /// closing) the least-recently-used statement if the cache is full.
    pub fn prepare_statement(
        &mut self,
        name: &str,
        sql: &str,
    ) -> Result<StatementId, EngineError> {
        if let Some(id) = self.prepared.touch(name) {
            return Ok(*id);
        }

        let id = self.connection.prepare(name, sql)?;
        if let Some(evicted) = self.prepared.insert(name.to_string(), sql.to_string(), id) {
            self.connection.unprepare(evicted.handle);
        }
        Ok(id)
    }

    /// Remove a statement from the cache and close it natively. A name that
    /// was never cached is still a no-op success: the statement existed only
    /// as a floating handle and there is no bookkeeping to touch.
    pub fn unprepare_statement(&mut self, name: &str) {
        if let Some(stmt) = self.prepared.remove(name) {
            self.connection.unprepare(stmt.handle);
        }
    }

    /// Probe the connection, updating `status` and the failure streak
    pub fn health_check(&mut self) -> bool {
        let healthy = self.connection.health_check();
        if healthy {
            self.status = ConnectionStatus::Connected;
            self.consecutive_failures = 0;
        } else {
            self.status = ConnectionStatus::Disconnected;
            self.consecutive_failures += 1;
        }
        healthy
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("engine_kind", &self.engine_kind)
            .field("status", &self.status)
            .field("designator", &self.designator)
            .field("prepared_count", &self.prepared.len())
            .finish()
    }
}
