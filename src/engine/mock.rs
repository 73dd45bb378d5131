//! Scriptable In-Memory Engine
//!
//! The reference [`DatabaseEngine`] implementation. Tests use it to script
//! connect/health/execute outcomes and to observe execution order; demos use
//! it to run the full queue machinery without a real database.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    DatabaseEngine, EngineConnection, EngineError, EngineKind, QueryRequest, QueryResult,
    StatementId,
};
use crate::connstring::ConnectionConfig;

/// Shared, observable state for a [`MockEngine`] and all its connections
#[derive(Default)]
pub struct MockState {
    /// SQL of every executed query, in execution order
    pub executed: Mutex<Vec<String>>,
    /// Queries whose SQL contains one of these markers fail
    pub failing_sql: Mutex<Vec<String>>,
    /// Remaining connect attempts that should fail
    pub connect_failures: AtomicU32,
    /// Remaining health checks that should fail
    pub health_failures: AtomicU32,
    /// Scripted rows returned for a matching SQL fragment
    pub canned_rows: Mutex<Vec<(String, serde_json::Value)>>,
    /// Artificial execution delay
    pub latency: Mutex<Duration>,
    next_statement_id: AtomicU64,
    /// Total connections ever opened
    pub connections_opened: AtomicU32,
}

impl MockState {
    pub fn execution_log(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` health checks fail
    pub fn fail_next_health_checks(&self, n: u32) {
        self.health_failures.store(n, Ordering::SeqCst);
    }

    /// Fail any query whose SQL contains `marker`
    pub fn fail_sql_containing(&self, marker: &str) {
        self.failing_sql.lock().push(marker.to_string());
    }

    /// Return `rows` for any query whose SQL contains `marker`
    pub fn respond_with(&self, marker: &str, rows: serde_json::Value) {
        self.canned_rows.lock().push((marker.to_string(), rows));
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A scriptable engine for one [`EngineKind`]
pub struct MockEngine {
    kind: EngineKind,
    state: Arc<MockState>,
}

impl MockEngine {
    /// An engine that connects and executes without scripted failures
    pub fn reliable(kind: EngineKind) -> Self {
        MockEngine {
            kind,
            state: Arc::new(MockState::default()),
        }
    }

    /// An engine sharing externally held state, for test observation
    pub fn with_state(kind: EngineKind, state: Arc<MockState>) -> Self {
        MockEngine { kind, state }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl DatabaseEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        if MockState::take_failure(&self.state.connect_failures) {
            return Err(EngineError::Connect(format!(
                "scripted connect failure for {designator}"
            )));
        }

        self.state.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            database: config.database.clone(),
            prepared: HashSet::new(),
            in_transaction: false,
        }))
    }
}

/// One live mock connection
pub struct MockConnection {
    state: Arc<MockState>,
    #[allow(dead_code)]
    database: String,
    prepared: HashSet<StatementId>,
    in_transaction: bool,
}

impl EngineConnection for MockConnection {
    fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult, EngineError> {
        let latency = *self.state.latency.lock();
        if latency > Duration::ZERO {
            std::thread::sleep(latency);
        }

        self.state.executed.lock().push(request.sql.clone());

        let failing = self.state.failing_sql.lock();
        if failing.iter().any(|marker| request.sql.contains(marker)) {
            return Err(EngineError::Execute(format!(
                "scripted failure for: {}",
                request.sql
            )));
        }
        drop(failing);

        let canned = self.state.canned_rows.lock();
        for (marker, rows) in canned.iter() {
            if request.sql.contains(marker) {
                let row_count = rows.as_array().map_or(0, Vec::len);
                let mut result = QueryResult::ok();
                result.data = rows.clone();
                result.row_count = row_count;
                return Ok(result);
            }
        }

        Ok(QueryResult::ok())
    }

    fn prepare(&mut self, _name: &str, _sql: &str) -> Result<StatementId, EngineError> {
        let id = StatementId(self.state.next_statement_id.fetch_add(1, Ordering::SeqCst));
        self.prepared.insert(id);
        Ok(id)
    }

    fn unprepare(&mut self, id: StatementId) {
        self.prepared.remove(&id);
    }

    fn health_check(&mut self) -> bool {
        !MockState::take_failure(&self.state.health_failures)
    }

    fn begin_transaction(&mut self) -> Result<(), EngineError> {
        if self.in_transaction {
            return Err(EngineError::Transaction("transaction already open".into()));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), EngineError> {
        if !self.in_transaction {
            return Err(EngineError::Transaction("no open transaction".into()));
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        if !self.in_transaction {
            return Err(EngineError::Transaction("no open transaction".into()));
        }
        self.in_transaction = false;
        Ok(())
    }
}
