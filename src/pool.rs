//! Connection Pool
//!
//! Per-database pools of reusable [`DatabaseHandle`]s, keyed by a CRC32 hash
//! of the connection string. Acquisition prefers an idle handle with a
//! matching hash, creates a new connection while under capacity, and refuses
//! with a typed error once the pool is exhausted — callers treat exhaustion
//! as "try again later", never as fatal.
//!
//! Idle eviction ([`ConnectionPool::cleanup_idle`]) is time-based, distinct
//! from the capacity-based LRU inside each handle's prepared-statement cache.
//!
//! Pools use a plain mutex rather than a reader-writer lock: pool traffic is
//! acquire/release mutation, not the read-dominated pattern of the query
//! table cache.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::connstring::{mask_connection_string, parse_connection_string};
use crate::engine::{DatabaseEngine, DatabaseHandle, EngineKind};
use crate::error::{DbError, DbResult};

/// A pooled handle plus its slot bookkeeping
struct PoolEntry {
    handle: Arc<Mutex<DatabaseHandle>>,
    in_use: bool,
    connection_string_hash: u32,
    created_at: chrono::DateTime<chrono::Utc>,
    last_used: chrono::DateTime<chrono::Utc>,
}

/// Pool of reusable connections for one database
pub struct ConnectionPool {
    pub database_name: String,
    pub engine_kind: EngineKind,
    engine: Arc<dyn DatabaseEngine>,
    max_pool_size: usize,
    entries: Mutex<Vec<PoolEntry>>,
}

fn hash_connection_string(conn_string: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(conn_string.as_bytes());
    hasher.finalize()
}

impl ConnectionPool {
    pub fn new(
        database_name: &str,
        engine: Arc<dyn DatabaseEngine>,
        max_pool_size: usize,
    ) -> Self {
        ConnectionPool {
            database_name: database_name.to_string(),
            engine_kind: engine.kind(),
            engine,
            max_pool_size,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Acquire a connection for `conn_string`.
    ///
    /// Reuses an idle entry whose connection-string hash matches; otherwise
    /// opens a new connection while under `max_pool_size`; otherwise fails
    /// with [`DbError::PoolExhausted`].
    pub fn acquire(&self, conn_string: &str) -> DbResult<Arc<Mutex<DatabaseHandle>>> {
        let hash = hash_connection_string(conn_string);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries
            .iter_mut()
            .find(|e| !e.in_use && e.connection_string_hash == hash)
        {
            entry.in_use = true;
            entry.last_used = chrono::Utc::now();
            debug!(
                database = %self.database_name,
                "reusing pooled connection"
            );
            return Ok(Arc::clone(&entry.handle));
        }

        if entries.len() >= self.max_pool_size {
            return Err(DbError::PoolExhausted(self.database_name.clone()));
        }

        let config = parse_connection_string(conn_string);
        let designator = format!("POOL-{}-{:02}", self.database_name, entries.len());
        let connection = self.engine.connect(&config, &designator).map_err(|e| {
            DbError::ConnectionFailed {
                designator: designator.clone(),
                reason: e.to_string(),
            }
        })?;

        let handle = Arc::new(Mutex::new(DatabaseHandle::new(
            connection,
            self.engine_kind,
            &designator,
            config.prepared_statement_cache_size,
        )));

        let now = chrono::Utc::now();
        entries.push(PoolEntry {
            handle: Arc::clone(&handle),
            in_use: true,
            connection_string_hash: hash,
            created_at: now,
            last_used: now,
        });

        info!(
            database = %self.database_name,
            connection = %mask_connection_string(conn_string),
            pool_size = entries.len(),
            "opened new pooled connection"
        );
        Ok(handle)
    }

    /// Return a handle to the pool. Handles the pool does not own are
    /// ignored.
    pub fn release(&self, handle: &Arc<Mutex<DatabaseHandle>>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| Arc::ptr_eq(&e.handle, handle))
        {
            entry.in_use = false;
            entry.last_used = chrono::Utc::now();
        }
    }

    /// Close and remove idle entries older than `max_idle_secs`.
    /// Returns the number evicted.
    pub fn cleanup_idle(&self, max_idle_secs: u64) -> usize {
        let now = chrono::Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|e| {
            let idle_secs = now.signed_duration_since(e.last_used).num_seconds();
            e.in_use || idle_secs < max_idle_secs as i64
        });

        let evicted = before - entries.len();
        if evicted > 0 {
            info!(
                database = %self.database_name,
                evicted,
                remaining = entries.len(),
                "evicted idle pooled connections"
            );
        }
        evicted
    }

    pub fn pool_size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn active_connections(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.in_use).count()
    }

    /// Age of the oldest entry, seconds (diagnostics)
    pub fn oldest_connection_secs(&self) -> Option<i64> {
        let entries = self.entries.lock();
        let now = chrono::Utc::now();
        entries
            .iter()
            .map(|e| now.signed_duration_since(e.created_at).num_seconds())
            .max()
    }
}

/// Named pools, one per configured database.
///
/// Owned by the subsystem composition root and passed by reference; there is
/// no process-global pool manager.
pub struct ConnectionPoolManager {
    pools: Mutex<Vec<Arc<ConnectionPool>>>,
    config: PoolConfig,
}

impl ConnectionPoolManager {
    pub fn new(config: PoolConfig) -> Self {
        ConnectionPoolManager {
            pools: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Get the pool for `database_name`, creating it on first use
    pub fn pool_for(
        &self,
        database_name: &str,
        engine: Arc<dyn DatabaseEngine>,
    ) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.iter().find(|p| p.database_name == database_name) {
            return Arc::clone(pool);
        }

        let pool = Arc::new(ConnectionPool::new(
            database_name,
            engine,
            self.config.max_pool_size,
        ));
        pools.push(Arc::clone(&pool));
        pool
    }

    pub fn get(&self, database_name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools
            .lock()
            .iter()
            .find(|p| p.database_name == database_name)
            .cloned()
    }

    /// Run idle cleanup across every pool, returning the total evicted
    pub fn cleanup_idle_all(&self) -> usize {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.lock().clone();
        pools
            .iter()
            .map(|p| p.cleanup_idle(self.config.max_idle_secs))
            .sum()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }
}
