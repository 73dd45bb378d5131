//! Queue Heartbeat Loop
//!
//! One heartbeat thread per queue, responsible for everything that is not
//! query execution:
//!
//! - establishing the persistent connection, and re-establishing it after
//!   failures (the worker never connects)
//! - liveness checks on an established connection, with teardown on failure
//! - sweeping expired pending-result slots
//! - on Lead queues, the conductor duties: bootstrap, migration watermarks,
//!   child queue scaling
//!
//! Connection-state transitions are logged once per transition, not once per
//! tick; a database that stays down does not flood the log.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connstring::{mask_connection_string, parse_connection_string};
use crate::engine::DatabaseHandle;

use super::{lead, DatabaseQueue};

pub(super) fn heartbeat_loop(queue: &DatabaseQueue) {
    let interval = Duration::from_secs(queue.tuning().heartbeat_interval_secs);
    debug!(queue = %queue.label(), "heartbeat loop running");

    // First tick immediately so the initial connection is not delayed by a
    // full interval
    loop {
        perform_heartbeat(queue);
        if sleep_interruptibly(queue, interval) {
            break;
        }
    }

    debug!(queue = %queue.label(), "heartbeat loop exiting");
    queue.note_thread_exit();
}

/// Sleep up to `interval` in short slices, returning true if shutdown was
/// requested while sleeping
fn sleep_interruptibly(queue: &DatabaseQueue, interval: Duration) -> bool {
    let slice = Duration::from_millis(100);
    let deadline = std::time::Instant::now() + interval;
    loop {
        if queue.shutdown_requested() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return queue.shutdown_requested();
        }
        std::thread::sleep(slice.min(remaining));
    }
}

/// One heartbeat tick
pub(super) fn perform_heartbeat(queue: &DatabaseQueue) {
    if queue.shutdown_requested() {
        return;
    }

    if queue.is_connected() {
        check_established_connection(queue);
    } else {
        attempt_connection(queue);
    }

    if queue.is_lead_queue && queue.is_connected() {
        lead::conductor_tick(queue);
    }

    let swept = queue.pending().cleanup_expired();
    if swept > 0 {
        debug!(queue = %queue.label(), swept, "swept expired pending results");
    }

    queue.mark_heartbeat();
}

/// Probe the persistent connection; tear it down on a failed check so the
/// next tick reconnects from scratch
fn check_established_connection(queue: &DatabaseQueue) {
    let Some(handle) = queue.connection_snapshot() else {
        // State says connected but the slot is empty; resynchronize
        queue.release_connection();
        return;
    };

    if handle.lock().health_check() {
        return;
    }

    warn!(queue = %queue.label(), "health check failed; dropping connection");
    queue.log_gate_teardown();
    queue.release_connection();
}

/// Try to establish the persistent connection. On a Lead, the first attempt
/// (success or failure) releases anyone blocked in
/// [`DatabaseQueue::wait_for_initial_connection`].
fn attempt_connection(queue: &DatabaseQueue) {
    queue.mark_connection_attempt();

    let config = parse_connection_string(&queue.connection_string);
    let designator = queue.label();

    let outcome = queue.engine().connect(&config, &designator);
    match outcome {
        Ok(connection) => {
            let mut handle = DatabaseHandle::new(
                connection,
                queue.engine().kind(),
                &designator,
                queue.db_config().prepared_statement_cache_size,
            );

            // Validate before adoption: a connection that cannot pass its
            // first health check is not a connection
            if handle.health_check() {
                handle_connection_success(queue, handle);
            } else {
                warn!(
                    queue = %queue.label(),
                    "new connection failed its initial health check"
                );
            }
        }
        Err(e) => {
            if queue.log_gate_failure() {
                warn!(
                    queue = %queue.label(),
                    connection = %mask_connection_string(&queue.connection_string),
                    error = %e,
                    "connection attempt failed"
                );
            } else {
                debug!(queue = %queue.label(), error = %e, "reconnect attempt failed");
            }
        }
    }

    if queue.is_lead_queue {
        queue.signal_initial_connection_complete();
    }
}

fn handle_connection_success(queue: &DatabaseQueue, handle: DatabaseHandle) {
    queue.adopt_connection(handle);
    if queue.log_gate_success() {
        info!(
            queue = %queue.label(),
            connection = %mask_connection_string(&queue.connection_string),
            "database connection established"
        );
    }
}
