//! Queue Manager
//!
//! Registry of Lead queues, one per configured database. Owned by the
//! subsystem composition root; request handlers route through it by
//! database name. Workers are reached through their Lead, never
//! registered here directly.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::error::{DbError, DbResult};

use super::DatabaseQueue;

/// Aggregate statistics across every managed database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueManagerStats {
    pub databases: usize,
    pub connected_databases: usize,
    /// Lead queues plus their children
    pub total_queues: usize,
    pub total_depth: usize,
    pub total_processed: u64,
    pub total_failed: u64,
}

/// Lead queues keyed by database name
#[derive(Default)]
pub struct DatabaseQueueManager {
    leads: Mutex<Vec<Arc<DatabaseQueue>>>,
}

impl DatabaseQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database's Lead queue. A name already registered is
    /// refused; a database has exactly one Lead.
    pub fn add_database(&self, lead: Arc<DatabaseQueue>) -> DbResult<()> {
        let mut leads = self.leads.lock();
        if leads.iter().any(|l| l.database_name == lead.database_name) {
            return Err(DbError::Config(format!(
                "database '{}' is already registered",
                lead.database_name
            )));
        }
        info!(database = %lead.database_name, "database registered");
        leads.push(lead);
        Ok(())
    }

    pub fn get(&self, database: &str) -> Option<Arc<DatabaseQueue>> {
        self.leads
            .lock()
            .iter()
            .find(|l| l.database_name == database)
            .cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.leads
            .lock()
            .iter()
            .map(|l| l.database_name.clone())
            .collect()
    }

    pub fn database_count(&self) -> usize {
        self.leads.lock().len()
    }

    /// Snapshot of aggregate queue statistics
    pub fn stats(&self) -> QueueManagerStats {
        let leads: Vec<Arc<DatabaseQueue>> = self.leads.lock().clone();
        let mut stats = QueueManagerStats {
            databases: leads.len(),
            ..QueueManagerStats::default()
        };

        for lead in &leads {
            if lead.is_connected() {
                stats.connected_databases += 1;
            }
            let mut queues: Vec<Arc<DatabaseQueue>> = vec![Arc::clone(lead)];
            for kind in super::WORKER_KINDS {
                queues.extend(lead.children_of_kind(kind));
            }
            stats.total_queues += queues.len();
            for queue in queues {
                stats.total_depth += queue.depth();
                stats.total_processed += queue.total_queries_processed();
                stats.total_failed += queue.failed_queries();
            }
        }
        stats
    }

    /// Stop every Lead (each Lead stops its own children first)
    pub fn stop_all(&self) {
        let leads: Vec<Arc<DatabaseQueue>> = self.leads.lock().clone();
        for lead in leads {
            lead.stop();
        }
    }
}
