//! Lead Conductor Duties
//!
//! Work only the Lead queue performs, driven from its heartbeat once the
//! persistent connection is up:
//!
//! - bootstrap: run the configured bootstrap query once and load its rows
//!   into the shared query table cache
//! - migration watermarks: track the highest loaded and highest applied
//!   migration refs, and apply the next outstanding migration when
//!   auto-migration is enabled (one per tick, oldest first)
//! - child scaling: keep at least the configured minimum of each worker
//!   kind alive, add workers under sustained backlog, retire one surplus
//!   worker per tick once a whole kind has gone idle

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{DatabaseHandle, QueryRequest};
use crate::query_cache::{QueryCacheEntry, QueryType};

use super::{DatabaseQueue, QueueKind, WORKER_KINDS};

/// Backlog depth at which every worker of a kind being busy triggers a
/// scale-up
const SCALE_UP_DEPTH: usize = 10;

/// One conductor pass. Caller guarantees the queue is a connected Lead.
pub(super) fn conductor_tick(queue: &DatabaseQueue) {
    if let Some(handle) = queue.connection_snapshot() {
        if !queue.bootstrap_completed() {
            run_bootstrap(queue, &handle);
        }

        refresh_migration_status(queue);

        if queue.db_config().auto_migration {
            if let Some(next) = next_migration_to_apply(queue) {
                apply_single_migration(queue, &handle, next);
            }
        }
    }

    manage_child_queues(queue);
}

/// Execute the bootstrap query and populate the query table cache from its
/// rows. A failed execution leaves bootstrap incomplete so the next tick
/// retries; a bootstrap configured as absent or empty completes trivially.
pub(super) fn run_bootstrap(queue: &DatabaseQueue, handle: &Arc<Mutex<DatabaseHandle>>) {
    let sql = match queue.bootstrap_query.as_deref() {
        None | Some("") => {
            queue.set_bootstrap_completed();
            return;
        }
        Some(sql) => sql,
    };

    let outcome = handle.lock().execute(&QueryRequest::new(sql));
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            warn!(queue = %queue.label(), error = %e, "bootstrap query failed");
            return;
        }
    };

    let rows = match result.data.as_array() {
        Some(rows) => rows,
        None => {
            warn!(queue = %queue.label(), "bootstrap query returned no row array");
            queue.set_bootstrap_completed();
            return;
        }
    };

    let mut loaded = 0usize;
    for row in rows {
        match parse_bootstrap_row(row, queue.db_config().query_timeout_secs) {
            Some(entry) => {
                let query_ref = entry.query_ref;
                match queue.query_cache.add_entry(entry) {
                    Ok(()) => loaded += 1,
                    Err(e) => {
                        warn!(queue = %queue.label(), query_ref, error = %e, "skipping bootstrap row");
                    }
                }
            }
            None => {
                debug!(queue = %queue.label(), %row, "ignoring malformed bootstrap row");
            }
        }
    }

    queue.set_bootstrap_completed();
    info!(
        queue = %queue.label(),
        loaded,
        cache_entries = queue.query_cache.entry_count(),
        "bootstrap complete"
    );
}

/// Parse one bootstrap row into a cache entry. Rows missing `query_ref`,
/// a recognized `query_type`, or `query_template` are ignored.
fn parse_bootstrap_row(row: &serde_json::Value, default_timeout: u64) -> Option<QueryCacheEntry> {
    let obj = row.as_object()?;
    let query_ref = obj.get("query_ref")?.as_i64()?;
    let query_type = QueryType::from_schema_value(obj.get("query_type")?.as_i64()?)?;
    let sql_template = obj.get("query_template")?.as_str()?;

    let description = obj
        .get("description")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let queue_hint = obj
        .get("queue_type")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse::<QueueKind>().ok())
        .filter(|k| *k != QueueKind::Lead)
        .unwrap_or(QueueKind::Medium);
    let timeout = obj
        .get("timeout_seconds")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(default_timeout);

    Some(QueryCacheEntry::new(
        query_ref,
        query_type,
        sql_template,
        description,
        queue_hint,
        timeout,
    ))
}

/// Recompute migration watermarks from the query table cache
pub(super) fn refresh_migration_status(queue: &DatabaseQueue) {
    let available = queue
        .query_cache
        .max_ref_of_type(QueryType::MigrationLoaded)
        .unwrap_or(-1);
    let installed = queue
        .query_cache
        .max_ref_of_type(QueryType::MigrationApplied)
        .unwrap_or(-1);
    let empty = queue.query_cache.entry_count() == 0;
    queue.set_migration_watermarks(available, installed, empty);
}

/// Lowest loaded migration ref with no applied marker, if any
pub(super) fn next_migration_to_apply(queue: &DatabaseQueue) -> Option<i64> {
    let applied = queue.query_cache.refs_of_type(QueryType::MigrationApplied);
    queue
        .query_cache
        .refs_of_type(QueryType::MigrationLoaded)
        .into_iter()
        .find(|r| applied.binary_search(r).is_err())
}

/// Apply one loaded migration: run its SQL and record the applied marker.
/// Returns true on success.
pub(super) fn apply_single_migration(
    queue: &DatabaseQueue,
    handle: &Arc<Mutex<DatabaseHandle>>,
    query_ref: i64,
) -> bool {
    let Some(migration) = queue
        .query_cache
        .lookup_by_ref_and_type(query_ref, QueryType::MigrationLoaded)
    else {
        warn!(queue = %queue.label(), query_ref, "migration to apply not found in cache");
        return false;
    };

    let request =
        QueryRequest::new(migration.sql_template.clone());
    if let Err(e) = handle.lock().execute(&request) {
        warn!(queue = %queue.label(), query_ref, error = %e, "migration failed");
        return false;
    }

    let marker = QueryCacheEntry::new(
        query_ref,
        QueryType::MigrationApplied,
        "",
        format!("applied migration {query_ref}"),
        QueueKind::Slow,
        migration.timeout_seconds,
    );
    if let Err(e) = queue.query_cache.add_entry(marker) {
        warn!(queue = %queue.label(), query_ref, error = %e, "could not record applied migration");
    }

    refresh_migration_status(queue);
    info!(queue = %queue.label(), query_ref, "migration applied");
    true
}

/// Scale child worker queues: up to the minimum always, one more under
/// sustained backlog, one surplus retired per pass when every queue of a
/// kind is empty
pub(super) fn manage_child_queues(queue: &DatabaseQueue) {
    if !queue.can_spawn_queues || queue.shutdown_requested() {
        return;
    }
    let tuning = queue.tuning();

    for kind in WORKER_KINDS {
        let children = queue.children_of_kind(kind);

        if children.len() < tuning.min_workers_per_kind {
            for _ in children.len()..tuning.min_workers_per_kind {
                spawn_child(queue, kind);
            }
            continue;
        }

        let all_backlogged = !children.is_empty()
            && children.iter().all(|c| c.depth() >= SCALE_UP_DEPTH);
        if all_backlogged && children.len() < tuning.max_workers_per_kind {
            spawn_child(queue, kind);
            continue;
        }

        // Retire at most one surplus worker per pass, preferring the
        // newest, and only while every queue of the kind is empty. A kind
        // never drops below the minimum, and never to zero.
        let all_empty = children.iter().all(|c| c.depth() == 0);
        if all_empty && children.len() > tuning.min_workers_per_kind.max(1) {
            if let Some(child) = children.iter().max_by_key(|c| c.queue_number) {
                info!(queue = %queue.label(), child = %child.label(), "retiring idle worker queue");
                child.stop();
                queue.remove_child(child);
            }
        }
    }
}

fn spawn_child(queue: &DatabaseQueue, kind: QueueKind) {
    // Re-checked here, not just at the pass entry: a stop() racing this
    // tick must not gain a freshly started child
    if queue.shutdown_requested() {
        return;
    }
    let number = queue.next_queue_number();
    match DatabaseQueue::worker(queue, kind, number) {
        Ok(child) => {
            child.start();
            info!(queue = %queue.label(), child = %child.label(), "spawned worker queue");
            queue.push_child(child);
        }
        Err(e) => {
            warn!(queue = %queue.label(), %kind, error = %e, "failed to create worker queue");
        }
    }
}
