//! Database Queues
//!
//! The central actor of the crate. Each database gets one Lead queue plus
//! on-demand typed worker queues (slow/medium/fast/cache). Every queue owns:
//!
//! - a FIFO of submitted queries (strict submission order within the queue)
//! - a persistent connection, established and torn down by its heartbeat
//!   thread and read by its worker thread
//! - exactly two threads: one worker, one heartbeat
//!
//! The Lead additionally owns the shared query table cache, spawns and
//! scales child queues, runs the bootstrap query, and tracks migration
//! watermarks.
//!
//! ## Connection handoff
//!
//! `persistent_connection` is an `ArcSwapOption`: the heartbeat thread is
//! the only writer (connect/teardown), the worker loads a snapshot per
//! query. The swap itself is atomic, so the worker can never observe a
//! half-updated handle; per-call serialization happens on the handle's own
//! mutex.
//!
//! ## Shutdown
//!
//! Cooperative: a shutdown flag checked at loop boundaries. In-flight engine
//! calls are not interrupted; teardown waits for loop exit up to a hard
//! deadline and abandons the thread with a warning past it, then fails any
//! queries still sitting in the FIFO so no waiter is left suspended.

mod heartbeat;
mod lead;
pub mod manager;
mod worker;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::config::{DatabaseConfig, QueueTuning};
use crate::engine::{DatabaseEngine, DatabaseHandle};
use crate::error::{DbError, DbResult};
use crate::pending::PendingResultManager;
use crate::query_cache::QueryTableCache;

/// Queue role / priority class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Lead,
    Slow,
    Medium,
    Fast,
    Cache,
}

/// The worker kinds a Lead may spawn, in spawn order
pub const WORKER_KINDS: [QueueKind; 4] = [
    QueueKind::Slow,
    QueueKind::Medium,
    QueueKind::Fast,
    QueueKind::Cache,
];

impl QueueKind {
    /// Single-letter tag used in designator labels
    pub fn tag(self) -> char {
        match self {
            Self::Lead => 'L',
            Self::Slow => 'S',
            Self::Medium => 'M',
            Self::Fast => 'F',
            Self::Cache => 'C',
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lead => write!(f, "Lead"),
            Self::Slow => write!(f, "slow"),
            Self::Medium => write!(f, "medium"),
            Self::Fast => write!(f, "fast"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lead" => Ok(Self::Lead),
            "slow" => Ok(Self::Slow),
            "medium" => Ok(Self::Medium),
            "fast" => Ok(Self::Fast),
            "cache" => Ok(Self::Cache),
            _ => Err(format!(
                "Unknown queue kind: '{s}'. Valid options: lead, slow, medium, fast, cache"
            )),
        }
    }
}

/// One unit of work submitted to a queue
#[derive(Debug, Clone)]
pub struct DatabaseQuery {
    /// Identifier linking this query to a pending-result slot. Queries
    /// without an id run fire-and-forget.
    pub query_id: Option<String>,
    /// Positional SQL ready for the engine. `None` simulates execution
    /// without touching the engine.
    pub query_template: Option<String>,
    /// Bound parameter values in placeholder order
    pub parameters: Vec<serde_json::Value>,
    pub timeout: Duration,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl DatabaseQuery {
    pub fn new(query_id: Option<String>, query_template: Option<String>) -> Self {
        DatabaseQuery {
            query_id,
            query_template,
            parameters: Vec::new(),
            timeout: Duration::from_secs(30),
            submitted_at: chrono::Utc::now(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Loop-exit bookkeeping for the bounded shutdown join
#[derive(Default)]
struct ThreadExits {
    exited: Mutex<usize>,
    all_exited: Condvar,
}

/// Condvar pair for `wait_for_initial_connection`
#[derive(Default)]
struct InitialConnectionGate {
    lock: Mutex<bool>,
    attempted: Condvar,
}

/// A Lead or worker queue for one database
pub struct DatabaseQueue {
    pub database_name: String,
    pub connection_string: String,
    pub kind: QueueKind,
    /// Sequential per-database number; the Lead is 00
    pub queue_number: usize,
    /// Bootstrap query, Lead only. `Some("")` and `None` are distinct:
    /// an empty string was configured, `None` means not configured at all.
    pub bootstrap_query: Option<String>,

    engine: Arc<dyn DatabaseEngine>,
    tuning: QueueTuning,
    db_config: DatabaseConfig,

    /// Current designator tags (e.g. "LSMFC" on a fresh Lead)
    tags: Mutex<String>,

    sender: Sender<DatabaseQuery>,
    receiver: Receiver<DatabaseQuery>,

    /// Written by the heartbeat thread only; read by the worker
    persistent_connection: ArcSwapOption<Mutex<DatabaseHandle>>,

    /// Shared query template cache. The Lead builds it; workers hold a
    /// read-only reference to the same cache.
    pub query_cache: Arc<QueryTableCache>,
    pending: Arc<PendingResultManager>,

    // Role flags
    pub is_lead_queue: bool,
    pub can_spawn_queues: bool,

    // Lead-only child management
    children: Mutex<Vec<Arc<DatabaseQueue>>>,
    next_queue_number: AtomicUsize,

    // Connection / lifecycle state
    shutdown_requested: AtomicBool,
    is_connected: AtomicBool,
    connected_logged: AtomicBool,
    failure_logged: AtomicBool,
    initial_connection_attempted: AtomicBool,
    initial_gate: InitialConnectionGate,
    bootstrap_completed: AtomicBool,

    // Heartbeat bookkeeping
    last_heartbeat: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    last_connection_attempt: Mutex<Option<chrono::DateTime<chrono::Utc>>>,

    // Migration watermarks (Lead only); -1 = none seen
    latest_available_migration: AtomicI64,
    latest_installed_migration: AtomicI64,
    empty_database: AtomicBool,

    // Statistics
    total_queries_processed: AtomicU64,
    failed_queries: AtomicU64,

    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    exits: ThreadExits,
}

impl DatabaseQueue {
    /// Create the Lead queue for a database. Does not start threads; call
    /// [`DatabaseQueue::start`] on the returned `Arc`.
    pub fn lead(
        db_config: DatabaseConfig,
        engine: Arc<dyn DatabaseEngine>,
        pending: Arc<PendingResultManager>,
        tuning: QueueTuning,
    ) -> DbResult<Arc<Self>> {
        let bootstrap_query = db_config.bootstrap_query.clone();
        let queue = Self::build(
            db_config,
            engine,
            pending,
            tuning,
            QueueKind::Lead,
            0,
            bootstrap_query,
            Arc::new(QueryTableCache::new()),
        )?;
        Ok(Arc::new(queue))
    }

    /// Create a worker queue of the given kind, sharing the Lead's caches
    pub fn worker(
        lead: &DatabaseQueue,
        kind: QueueKind,
        queue_number: usize,
    ) -> DbResult<Arc<Self>> {
        debug_assert_ne!(kind, QueueKind::Lead);
        let queue = Self::build(
            lead.db_config.clone(),
            Arc::clone(&lead.engine),
            Arc::clone(&lead.pending),
            lead.tuning.clone(),
            kind,
            queue_number,
            None,
            Arc::clone(&lead.query_cache),
        )?;
        Ok(Arc::new(queue))
    }

    fn build(
        db_config: DatabaseConfig,
        engine: Arc<dyn DatabaseEngine>,
        pending: Arc<PendingResultManager>,
        tuning: QueueTuning,
        kind: QueueKind,
        queue_number: usize,
        bootstrap_query: Option<String>,
        query_cache: Arc<QueryTableCache>,
    ) -> DbResult<Self> {
        if db_config.name.is_empty() {
            return Err(DbError::EmptyDatabaseName);
        }
        if db_config.connection_string.is_empty() {
            return Err(DbError::EmptyConnectionString);
        }

        let is_lead = kind == QueueKind::Lead;
        let tags = if is_lead {
            "LSMFC".to_string()
        } else {
            kind.tag().to_string()
        };

        let (sender, receiver) = crossbeam_channel::unbounded();

        Ok(DatabaseQueue {
            database_name: db_config.name.clone(),
            connection_string: db_config.connection_string.clone(),
            kind,
            queue_number,
            bootstrap_query,
            engine,
            tuning,
            db_config,
            tags: Mutex::new(tags),
            sender,
            receiver,
            persistent_connection: ArcSwapOption::empty(),
            query_cache,
            pending,
            is_lead_queue: is_lead,
            can_spawn_queues: is_lead,
            children: Mutex::new(Vec::new()),
            next_queue_number: AtomicUsize::new(1),
            shutdown_requested: AtomicBool::new(false),
            is_connected: AtomicBool::new(false),
            connected_logged: AtomicBool::new(false),
            failure_logged: AtomicBool::new(false),
            initial_connection_attempted: AtomicBool::new(false),
            initial_gate: InitialConnectionGate::default(),
            bootstrap_completed: AtomicBool::new(false),
            last_heartbeat: Mutex::new(None),
            last_connection_attempt: Mutex::new(None),
            latest_available_migration: AtomicI64::new(-1),
            latest_installed_migration: AtomicI64::new(-1),
            empty_database: AtomicBool::new(false),
            total_queries_processed: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            threads: Mutex::new(Vec::new()),
            exits: ThreadExits::default(),
        })
    }

    /// Spawn this queue's worker and heartbeat threads
    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return;
        }

        let worker_queue = Arc::clone(self);
        let label = format!("{}-worker", self.label());
        threads.push(
            std::thread::Builder::new()
                .name(label)
                .spawn(move || worker::worker_loop(&worker_queue))
                .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}")),
        );

        let heartbeat_queue = Arc::clone(self);
        let label = format!("{}-heartbeat", self.label());
        threads.push(
            std::thread::Builder::new()
                .name(label)
                .spawn(move || heartbeat::heartbeat_loop(&heartbeat_queue))
                .unwrap_or_else(|e| panic!("failed to spawn heartbeat thread: {e}")),
        );

        info!(queue = %self.label(), "queue started");
    }

    /// Designator label, e.g. "DQM-acuranzo-00-LSMFC"
    pub fn label(&self) -> String {
        format!(
            "DQM-{}-{:02}-{}",
            self.database_name,
            self.queue_number,
            self.tags.lock()
        )
    }

    pub fn add_tag(&self, tag: char) {
        let mut tags = self.tags.lock();
        if !tags.contains(tag) {
            tags.push(tag);
        }
    }

    pub fn remove_tag(&self, tag: char) {
        let mut tags = self.tags.lock();
        tags.retain(|c| c != tag);
    }

    pub fn tags(&self) -> String {
        self.tags.lock().clone()
    }

    /// Submit a query to this queue's FIFO
    pub fn submit(&self, query: DatabaseQuery) -> DbResult<()> {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return Err(DbError::ShuttingDown(self.database_name.clone()));
        }
        self.sender
            .send(query)
            .map_err(|_| DbError::QueueClosed(self.database_name.clone()))
    }

    /// Number of queries waiting in the FIFO
    pub fn depth(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn total_queries_processed(&self) -> u64 {
        self.total_queries_processed.load(Ordering::Relaxed)
    }

    pub fn failed_queries(&self) -> u64 {
        self.failed_queries.load(Ordering::Relaxed)
    }

    pub fn bootstrap_completed(&self) -> bool {
        self.bootstrap_completed.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        *self.last_heartbeat.lock()
    }

    pub fn last_connection_attempt(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        *self.last_connection_attempt.lock()
    }

    /// Highest migration ref seen as loaded (-1 if none)
    pub fn latest_available_migration(&self) -> i64 {
        self.latest_available_migration.load(Ordering::SeqCst)
    }

    /// Highest migration ref seen as applied (-1 if none)
    pub fn latest_installed_migration(&self) -> i64 {
        self.latest_installed_migration.load(Ordering::SeqCst)
    }

    pub fn is_empty_database(&self) -> bool {
        self.empty_database.load(Ordering::SeqCst)
    }

    /// Block until the Lead's first connection attempt completes (success
    /// or failure) or `timeout` elapses. Non-lead queues return true
    /// immediately; dependent subsystems only gate on the Lead.
    pub fn wait_for_initial_connection(&self, timeout: Duration) -> bool {
        if !self.is_lead_queue {
            return true;
        }
        if self.initial_connection_attempted.load(Ordering::SeqCst) {
            return true;
        }

        let deadline = std::time::Instant::now() + timeout;
        let mut attempted = self.initial_gate.lock.lock();
        while !*attempted {
            if self
                .initial_gate
                .attempted
                .wait_until(&mut attempted, deadline)
                .timed_out()
            {
                return *attempted;
            }
        }
        true
    }

    pub(crate) fn signal_initial_connection_complete(&self) {
        if self
            .initial_connection_attempted
            .swap(true, Ordering::SeqCst)
        {
            return;
        }
        let mut attempted = self.initial_gate.lock.lock();
        *attempted = true;
        self.initial_gate.attempted.notify_all();
    }

    /// Request shutdown and wait for both loop threads to exit, up to the
    /// configured deadline. Past the deadline the threads are abandoned
    /// (an engine call that never returns cannot be interrupted). Children
    /// are stopped first. Queries still in the FIFO afterwards are failed
    /// so their waiters unblock.
    pub fn stop(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(queue = %self.label(), "stopping queue");

        for child in self.children.lock().iter() {
            child.stop();
        }

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        let expected = handles.len();
        let deadline = std::time::Instant::now()
            + Duration::from_secs(self.tuning.shutdown_deadline_secs);

        let mut exited = self.exits.exited.lock();
        let mut timed_out = false;
        while *exited < expected {
            if self
                .exits
                .all_exited
                .wait_until(&mut exited, deadline)
                .timed_out()
            {
                timed_out = true;
                break;
            }
        }
        drop(exited);

        if timed_out {
            warn!(
                queue = %self.label(),
                "threads did not exit before the shutdown deadline; abandoning"
            );
            // Handles are dropped (detached); joining could hang forever.
        } else {
            for handle in handles {
                let _ = handle.join();
            }
        }

        // A conductor tick overlapping this call may have added children
        // after the sweep above; stop any late arrivals now that the
        // heartbeat thread is gone
        for child in self.children.lock().iter() {
            child.stop();
        }

        // Unblock every waiter still pointing at this queue
        while let Ok(query) = self.receiver.try_recv() {
            if let Some(query_id) = &query.query_id {
                self.pending.signal(
                    query_id,
                    crate::engine::QueryResult::failed("queue shut down before execution"),
                );
            }
        }

        self.release_connection();
        info!(queue = %self.label(), "queue stopped");
    }

    pub(crate) fn note_thread_exit(&self) {
        let mut exited = self.exits.exited.lock();
        *exited += 1;
        self.exits.all_exited.notify_all();
    }

    pub(crate) fn release_connection(&self) {
        if self.persistent_connection.swap(None).is_some() {
            self.is_connected.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn connection_snapshot(&self) -> Option<Arc<Mutex<DatabaseHandle>>> {
        self.persistent_connection.load_full()
    }

    pub(crate) fn adopt_connection(&self, handle: DatabaseHandle) {
        self.persistent_connection
            .store(Some(Arc::new(Mutex::new(handle))));
        self.is_connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn receiver(&self) -> &Receiver<DatabaseQuery> {
        &self.receiver
    }

    pub(crate) fn pending(&self) -> &PendingResultManager {
        &self.pending
    }

    pub(crate) fn engine(&self) -> &Arc<dyn DatabaseEngine> {
        &self.engine
    }

    pub(crate) fn tuning(&self) -> &QueueTuning {
        &self.tuning
    }

    pub(crate) fn db_config(&self) -> &DatabaseConfig {
        &self.db_config
    }

    pub(crate) fn record_processed(&self, success: bool) {
        self.total_queries_processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn mark_heartbeat(&self) {
        *self.last_heartbeat.lock() = Some(chrono::Utc::now());
    }

    pub(crate) fn mark_connection_attempt(&self) {
        *self.last_connection_attempt.lock() = Some(chrono::Utc::now());
    }

    /// True when this successful connection deserves an info line
    /// (transition into the connected state)
    pub(crate) fn log_gate_success(&self) -> bool {
        self.failure_logged.store(false, Ordering::SeqCst);
        !self.connected_logged.swap(true, Ordering::SeqCst)
    }

    /// True for the first failed attempt of a down period; later attempts
    /// in the same period log at debug only
    pub(crate) fn log_gate_failure(&self) -> bool {
        !self.failure_logged.swap(true, Ordering::SeqCst)
    }

    /// Record the up-to-down transition after a failed health check. The
    /// teardown itself is the warning; reconnect attempts stay quiet until
    /// the next success.
    pub(crate) fn log_gate_teardown(&self) {
        self.connected_logged.store(false, Ordering::SeqCst);
        self.failure_logged.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_bootstrap_completed(&self) {
        self.bootstrap_completed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_migration_watermarks(&self, available: i64, installed: i64, empty: bool) {
        self.latest_available_migration
            .store(available, Ordering::SeqCst);
        self.latest_installed_migration
            .store(installed, Ordering::SeqCst);
        self.empty_database.store(empty, Ordering::SeqCst);
    }

    /// Child queues of a given kind (Lead only)
    pub fn children_of_kind(&self, kind: QueueKind) -> Vec<Arc<DatabaseQueue>> {
        self.children
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    pub(crate) fn next_queue_number(&self) -> usize {
        self.next_queue_number.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn push_child(&self, child: Arc<DatabaseQueue>) {
        self.children.lock().push(child);
    }

    pub(crate) fn remove_child(&self, child: &Arc<DatabaseQueue>) {
        self.children.lock().retain(|c| !Arc::ptr_eq(c, child));
    }
}

impl fmt::Debug for DatabaseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseQueue")
            .field("database_name", &self.database_name)
            .field("kind", &self.kind)
            .field("queue_number", &self.queue_number)
            .field("depth", &self.depth())
            .field("is_connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::engine::mock::MockEngine;
    use crate::engine::EngineKind;

    fn test_db_config(bootstrap: Option<&str>) -> DatabaseConfig {
        DatabaseConfig {
            name: "testdb".to_string(),
            engine: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
            bootstrap_query: bootstrap.map(str::to_string),
            max_queries_per_request: 100,
            prepared_statement_cache_size: 32,
            query_timeout_secs: 30,
            auto_migration: false,
        }
    }

    fn test_lead(bootstrap: Option<&str>) -> Arc<DatabaseQueue> {
        DatabaseQueue::lead(
            test_db_config(bootstrap),
            Arc::new(MockEngine::reliable(EngineKind::Sqlite)),
            Arc::new(PendingResultManager::new()),
            QueueTuning::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_lead_creation_defaults() {
        let lead = test_lead(None);
        assert!(lead.is_lead_queue);
        assert!(lead.can_spawn_queues);
        assert_eq!(lead.kind, QueueKind::Lead);
        assert_eq!(lead.queue_number, 0);
        assert_eq!(lead.tags(), "LSMFC");
        assert_eq!(lead.depth(), 0);
        assert!(!lead.is_connected());
        assert_eq!(lead.latest_available_migration(), -1);
    }

    #[test]
    fn test_bootstrap_none_vs_empty_string() {
        // Not configured at all
        let lead = test_lead(None);
        assert_eq!(lead.bootstrap_query, None);

        // Configured as the literal empty string: observably different
        let lead = test_lead(Some(""));
        assert_eq!(lead.bootstrap_query.as_deref(), Some(""));
    }

    #[test]
    fn test_creation_validation() {
        let mut config = test_db_config(None);
        config.name = String::new();
        let err = DatabaseQueue::lead(
            config,
            Arc::new(MockEngine::reliable(EngineKind::Sqlite)),
            Arc::new(PendingResultManager::new()),
            QueueTuning::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::EmptyDatabaseName));

        let mut config = test_db_config(None);
        config.connection_string = String::new();
        let err = DatabaseQueue::lead(
            config,
            Arc::new(MockEngine::reliable(EngineKind::Sqlite)),
            Arc::new(PendingResultManager::new()),
            QueueTuning::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::EmptyConnectionString));
    }

    #[test]
    fn test_worker_creation() {
        let lead = test_lead(None);
        let worker = DatabaseQueue::worker(&lead, QueueKind::Fast, 1).unwrap();

        assert!(!worker.is_lead_queue);
        assert!(!worker.can_spawn_queues);
        assert_eq!(worker.kind, QueueKind::Fast);
        assert_eq!(worker.tags(), "F");
        assert_eq!(worker.queue_number, 1);
        assert_eq!(worker.bootstrap_query, None);
        // Shares the Lead's cache
        assert!(Arc::ptr_eq(&lead.query_cache, &worker.query_cache));
    }

    #[test]
    fn test_label_format() {
        let lead = test_lead(None);
        assert_eq!(lead.label(), "DQM-testdb-00-LSMFC");

        let worker = DatabaseQueue::worker(&lead, QueueKind::Slow, 3).unwrap();
        assert_eq!(worker.label(), "DQM-testdb-03-S");
    }

    #[test]
    fn test_tag_management() {
        let lead = test_lead(None);
        lead.remove_tag('S');
        assert_eq!(lead.tags(), "LMFC");
        lead.add_tag('S');
        assert_eq!(lead.tags(), "LMFCS");
        // Adding an existing tag is a no-op
        lead.add_tag('L');
        assert_eq!(lead.tags(), "LMFCS");
    }

    #[test]
    fn test_submit_and_depth() {
        let lead = test_lead(None);
        lead.submit(DatabaseQuery::new(None, Some("SELECT 1".into())))
            .unwrap();
        lead.submit(DatabaseQuery::new(None, Some("SELECT 2".into())))
            .unwrap();
        assert_eq!(lead.depth(), 2);
    }

    #[test]
    fn test_submit_after_shutdown_refused() {
        let lead = test_lead(None);
        lead.stop();
        let err = lead
            .submit(DatabaseQuery::new(None, None))
            .unwrap_err();
        assert!(matches!(err, DbError::ShuttingDown(_)));
    }

    #[test]
    fn test_queue_kind_roundtrip() {
        for kind in [
            QueueKind::Lead,
            QueueKind::Slow,
            QueueKind::Medium,
            QueueKind::Fast,
            QueueKind::Cache,
        ] {
            assert_eq!(kind.to_string().parse::<QueueKind>().unwrap(), kind);
        }
        assert!("priority".parse::<QueueKind>().is_err());
    }

    #[test]
    fn test_wait_for_initial_connection_worker_is_immediate() {
        let lead = test_lead(None);
        let worker = DatabaseQueue::worker(&lead, QueueKind::Fast, 1).unwrap();
        assert!(worker.wait_for_initial_connection(Duration::from_secs(0)));
    }

    #[test]
    fn test_wait_for_initial_connection_lead_times_out() {
        let lead = test_lead(None);
        // No threads started: nothing will ever signal
        assert!(!lead.wait_for_initial_connection(Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_for_initial_connection_signaled() {
        let lead = test_lead(None);
        let waiter = {
            let lead = Arc::clone(&lead);
            std::thread::spawn(move || lead.wait_for_initial_connection(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        lead.signal_initial_connection_complete();
        assert!(waiter.join().expect("waiter panicked"));
    }
}
