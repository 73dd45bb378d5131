//! Queue Worker Loop
//!
//! One worker thread per queue. The loop polls the FIFO with a bounded
//! timeout so the shutdown flag is observed even when no queries arrive,
//! executes each query against the queue's persistent connection, and
//! signals the pending-result slot exactly once per identified query,
//! success or failure. The no-connection case is a failure signal too:
//! a waiter must never be left to time out because the connection happened
//! to be down.

use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{QueryRequest, QueryResult};

use super::{DatabaseQuery, DatabaseQueue};

pub(super) fn worker_loop(queue: &DatabaseQueue) {
    let poll = Duration::from_millis(queue.tuning().worker_poll_ms);
    debug!(queue = %queue.label(), "worker loop running");

    loop {
        if queue.shutdown_requested() {
            break;
        }
        match queue.receiver().recv_timeout(poll) {
            Ok(query) => process_single_query(queue, query),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(queue = %queue.label(), "worker loop exiting");
    queue.note_thread_exit();
}

/// Execute one query and deliver its outcome.
///
/// A query without a template simulates execution (success, no engine
/// call). A query without an id runs fire-and-forget; nothing is signaled.
fn process_single_query(queue: &DatabaseQueue, query: DatabaseQuery) {
    let result = match (&query.query_template, queue.connection_snapshot()) {
        (None, _) => QueryResult::ok(),
        (Some(_), None) => {
            warn!(
                queue = %queue.label(),
                "query arrived with no database connection"
            );
            QueryResult::failed("no database connection")
        }
        (Some(sql), Some(handle)) => {
            let request = QueryRequest {
                sql: sql.clone(),
                params: query.parameters.clone(),
                prepared: None,
                timeout: query.timeout,
            };
            let outcome = handle.lock().execute(&request);
            match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(queue = %queue.label(), error = %e, "query execution failed");
                    QueryResult::failed(e.to_string())
                }
            }
        }
    };

    queue.record_processed(result.success);

    if let Some(query_id) = &query.query_id {
        queue.pending().signal(query_id, result);
    }
}
