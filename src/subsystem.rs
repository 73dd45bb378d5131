//! Database Subsystem
//!
//! The composition root. Owns the engine registry, the queue manager, the
//! pending-result manager, and the connection pool manager; everything else
//! receives what it needs by reference or `Arc`. There are no process-global
//! singletons: two subsystems in one process (tests do this constantly) do
//! not share state.
//!
//! The request path is the `submit_query` / wait pair: look up the SQL
//! template by ref, convert named parameters to the engine's positional
//! dialect, register a pending slot, and hand the query to the least-loaded
//! queue matching the template's kind hint.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::engine::{DatabaseEngine, EngineKind, EngineRegistry};
use crate::error::{DbError, DbResult};
use crate::params::process_parameters;
use crate::pending::{PendingQueryResult, PendingResultManager};
use crate::pool::ConnectionPoolManager;
use crate::query_cache::QueryCacheEntry;
use crate::queue::manager::{DatabaseQueueManager, QueueManagerStats};
use crate::queue::{DatabaseQuery, DatabaseQueue, QueueKind};

pub struct DatabaseSubsystem {
    config: Config,
    registry: EngineRegistry,
    queues: DatabaseQueueManager,
    pending: Arc<PendingResultManager>,
    pools: ConnectionPoolManager,
}

impl std::fmt::Debug for DatabaseSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSubsystem").finish_non_exhaustive()
    }
}

impl DatabaseSubsystem {
    /// Bring up one Lead queue per configured database and start its
    /// threads. Fails fast on a database whose engine kind is unknown or
    /// unregistered; a database whose server is down is not an error here,
    /// its heartbeat keeps retrying.
    pub fn start(config: Config, registry: EngineRegistry) -> DbResult<Self> {
        let pending = Arc::new(PendingResultManager::new());
        let queues = DatabaseQueueManager::new();
        let pools = ConnectionPoolManager::new(config.pool.clone());

        for db in &config.databases {
            let kind: EngineKind = db
                .engine
                .parse()
                .map_err(|e: String| DbError::Config(e))?;
            let engine = registry
                .get(kind)
                .ok_or_else(|| DbError::EngineNotRegistered(kind.to_string()))?;

            let lead = DatabaseQueue::lead(
                db.clone(),
                engine,
                Arc::clone(&pending),
                config.queues.clone(),
            )?;
            lead.start();
            queues.add_database(lead)?;
        }

        info!(databases = config.databases.len(), "database subsystem started");
        Ok(DatabaseSubsystem {
            config,
            registry,
            queues,
            pending,
            pools,
        })
    }

    /// Block until every Lead has completed its first connection attempt or
    /// `timeout` elapses per database. Returns true if all attempts
    /// completed (not necessarily successfully).
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.queues
            .database_names()
            .iter()
            .all(|name| match self.queues.get(name) {
                Some(lead) => lead.wait_for_initial_connection(timeout),
                None => true,
            })
    }

    pub fn lead(&self, database: &str) -> DbResult<Arc<DatabaseQueue>> {
        self.queues
            .get(database)
            .ok_or_else(|| DbError::UnknownDatabase(database.to_string()))
    }

    /// Resolve a database and query ref to the Lead queue and the cached
    /// template in one step, as request handlers do
    pub fn lookup(
        &self,
        database: &str,
        query_ref: i64,
    ) -> DbResult<(Arc<DatabaseQueue>, Arc<QueryCacheEntry>)> {
        let lead = self.lead(database)?;
        let entry = lead
            .query_cache
            .lookup(query_ref)
            .ok_or(DbError::QueryRefNotFound(query_ref))?;
        Ok((lead, entry))
    }

    /// Resolve a query ref against a database's query table cache
    pub fn lookup_query(
        &self,
        database: &str,
        query_ref: i64,
    ) -> DbResult<Arc<QueryCacheEntry>> {
        self.lookup(database, query_ref).map(|(_, entry)| entry)
    }

    /// Pick the queue a query should run on: the least-loaded child of the
    /// hinted kind, falling back to the Lead itself when no such child
    /// exists yet
    pub fn select_queue(
        &self,
        database: &str,
        hint: QueueKind,
    ) -> DbResult<Arc<DatabaseQueue>> {
        let lead = self.lead(database)?;
        let candidate = lead
            .children_of_kind(hint)
            .into_iter()
            .min_by_key(|q| q.depth());
        Ok(candidate.unwrap_or(lead))
    }

    /// Submit a query by ref with a named-parameter JSON object. Returns
    /// the pending slot the caller blocks on with
    /// [`PendingQueryResult::wait`].
    pub fn submit_query(
        &self,
        database: &str,
        query_ref: i64,
        params_json: &serde_json::Value,
    ) -> DbResult<Arc<PendingQueryResult>> {
        let lead = self.lead(database)?;
        let entry = lead
            .query_cache
            .lookup(query_ref)
            .ok_or(DbError::QueryRefNotFound(query_ref))?;

        let processed = process_parameters(
            &entry.sql_template,
            params_json,
            lead.engine().kind(),
        )?;

        let query_id = uuid::Uuid::new_v4().to_string();
        let timeout = Duration::from_secs(entry.timeout_seconds);
        let pending = self.pending.register(&query_id, timeout);

        let query = DatabaseQuery {
            query_id: Some(query_id.clone()),
            query_template: Some(processed.sql),
            parameters: processed.params,
            timeout,
            submitted_at: chrono::Utc::now(),
        };

        let queue = self.select_queue(database, entry.queue_type_hint)?;
        if let Err(e) = queue.submit(query) {
            // Unblock the waiter before surfacing the error
            self.pending
                .signal(&query_id, crate::engine::QueryResult::failed(e.to_string()));
            return Err(e);
        }
        Ok(pending)
    }

    /// Submit by ref and block for the result in one call
    pub fn execute_query(
        &self,
        database: &str,
        query_ref: i64,
        params_json: &serde_json::Value,
    ) -> DbResult<crate::engine::QueryResult> {
        let pending = self.submit_query(database, query_ref, params_json)?;
        if !pending.wait() {
            return Err(DbError::PendingTimeout(pending.query_id.clone()));
        }
        pending
            .take_result()
            .ok_or_else(|| DbError::PendingTimeout(pending.query_id.clone()))
    }

    pub fn pool_for(&self, database: &str) -> DbResult<Arc<crate::pool::ConnectionPool>> {
        let lead = self.lead(database)?;
        let engine: Arc<dyn DatabaseEngine> = Arc::clone(lead.engine());
        Ok(self.pools.pool_for(database, engine))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingResultManager {
        &self.pending
    }

    pub fn stats(&self) -> QueueManagerStats {
        self.queues.stats()
    }

    /// Stop every queue (bounded joins) and evict idle pooled connections
    pub fn shutdown(&self) {
        info!("database subsystem shutting down");
        self.queues.stop_all();
        self.pools.cleanup_idle_all();
    }
}
