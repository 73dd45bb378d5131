// =============================================================================
// Subsystem integration tests
// =============================================================================
// End-to-end coverage of the database subsystem: bootstrap through the
// heartbeat, query submission and result handoff, FIFO ordering, connection
// recovery, and shutdown behavior. All against the scriptable mock engine.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use hydroqueue::config::{Config, DatabaseConfig, QueueTuning};
use hydroqueue::dedup::deduplicate_and_validate;
use hydroqueue::engine::mock::{MockEngine, MockState};
use hydroqueue::engine::{EngineKind, EngineRegistry};
use hydroqueue::pending::PendingResultManager;
use hydroqueue::queue::{DatabaseQuery, DatabaseQueue};
use hydroqueue::DatabaseSubsystem;

fn test_config(bootstrap: Option<&str>) -> Config {
    let mut config = Config::default();
    config.queues.heartbeat_interval_secs = 1;
    config.queues.worker_poll_ms = 10;
    config.databases.push(DatabaseConfig {
        name: "testdb".to_string(),
        engine: "sqlite".to_string(),
        connection_string: ":memory:".to_string(),
        bootstrap_query: bootstrap.map(str::to_string),
        max_queries_per_request: 100,
        prepared_statement_cache_size: 32,
        query_timeout_secs: 5,
        auto_migration: false,
    });
    config
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn registry_with_state() -> (EngineRegistry, Arc<MockState>) {
    init_tracing();
    let engine = MockEngine::reliable(EngineKind::Sqlite);
    let state = engine.state();
    let mut registry = EngineRegistry::new();
    registry.register(Arc::new(engine));
    (registry, state)
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// =============================================================================
// Bootstrap and request path
// =============================================================================

#[test]
fn test_bootstrap_then_execute_by_ref() {
    let (registry, state) = registry_with_state();
    state.respond_with(
        "query_defs",
        json!([
            {"query_ref": 1, "query_type": 999,
             "query_template": "SELECT * FROM users WHERE id = :id",
             "queue_type": "fast", "timeout_seconds": 5},
            {"query_ref": 2, "query_type": 999,
             "query_template": "SELECT COUNT(*) FROM users"},
        ]),
    );
    state.respond_with("FROM users WHERE", json!([{"id": 7, "name": "ada"}]));

    let subsystem = DatabaseSubsystem::start(
        test_config(Some("SELECT * FROM query_defs")),
        registry,
    )
    .unwrap();
    assert!(subsystem.wait_ready(Duration::from_secs(10)));

    let lead = subsystem.lead("testdb").unwrap();
    assert!(wait_until(Duration::from_secs(10), || lead.bootstrap_completed()));
    assert_eq!(lead.query_cache.entry_count(), 2);

    // Named parameter converted to the sqlite positional dialect
    let result = subsystem
        .execute_query("testdb", 1, &json!({"id": 7}))
        .unwrap();
    assert!(result.success);
    assert_eq!(result.row_count, 1);
    assert!(state
        .execution_log()
        .contains(&"SELECT * FROM users WHERE id = ?".to_string()));

    subsystem.shutdown();
}

#[test]
fn test_unknown_ref_and_missing_param_fail_before_submission() {
    let (registry, state) = registry_with_state();
    state.respond_with(
        "query_defs",
        json!([
            {"query_ref": 1, "query_type": 999,
             "query_template": "SELECT :a, :b"},
        ]),
    );

    let subsystem = DatabaseSubsystem::start(
        test_config(Some("SELECT * FROM query_defs")),
        registry,
    )
    .unwrap();
    let lead = subsystem.lead("testdb").unwrap();
    assert!(wait_until(Duration::from_secs(10), || lead.bootstrap_completed()));
    let executed_before = state.execution_log().len();

    assert!(subsystem.execute_query("testdb", 404, &json!({})).is_err());
    assert!(subsystem
        .execute_query("testdb", 1, &json!({"a": 1}))
        .is_err());

    // Neither reached the engine
    assert_eq!(state.execution_log().len(), executed_before);
    subsystem.shutdown();
}

#[test]
fn test_engine_failure_returned_to_waiter() {
    let (registry, state) = registry_with_state();
    state.respond_with(
        "query_defs",
        json!([
            {"query_ref": 1, "query_type": 999,
             "query_template": "DELETE FROM doomed_table"},
        ]),
    );
    state.fail_sql_containing("doomed_table");

    let subsystem = DatabaseSubsystem::start(
        test_config(Some("SELECT * FROM query_defs")),
        registry,
    )
    .unwrap();
    let lead = subsystem.lead("testdb").unwrap();
    assert!(wait_until(Duration::from_secs(10), || lead.bootstrap_completed()));

    let result = subsystem.execute_query("testdb", 1, &json!({})).unwrap();
    assert!(!result.success);
    assert!(result.error_message.is_some());

    subsystem.shutdown();
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_fifo_order_within_one_queue() {
    let (registry, state) = registry_with_state();
    let subsystem = DatabaseSubsystem::start(test_config(None), registry).unwrap();
    let lead = subsystem.lead("testdb").unwrap();
    assert!(subsystem.wait_ready(Duration::from_secs(10)));
    assert!(wait_until(Duration::from_secs(10), || lead.is_connected()));

    for i in 0..20 {
        lead.submit(DatabaseQuery::new(None, Some(format!("SELECT /* q{i} */ {i}"))))
            .unwrap();
    }
    assert!(wait_until(Duration::from_secs(10), || {
        lead.total_queries_processed() >= 20
    }));

    let log: Vec<String> = state
        .execution_log()
        .into_iter()
        .filter(|sql| sql.contains("/* q"))
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("SELECT /* q{i} */ {i}")).collect();
    assert_eq!(log, expected);

    subsystem.shutdown();
}

// =============================================================================
// Connection recovery
// =============================================================================

#[test]
fn test_reconnects_after_health_check_failure() {
    let (registry, state) = registry_with_state();
    let subsystem = DatabaseSubsystem::start(test_config(None), registry).unwrap();
    let lead = subsystem.lead("testdb").unwrap();
    assert!(wait_until(Duration::from_secs(10), || lead.is_connected()));

    let opened = state
        .connections_opened
        .load(std::sync::atomic::Ordering::SeqCst);
    state.fail_next_health_checks(1);

    // Heartbeat notices, tears down, and a later tick reconnects
    assert!(wait_until(Duration::from_secs(10), || {
        state
            .connections_opened
            .load(std::sync::atomic::Ordering::SeqCst)
            > opened
    }));
    assert!(wait_until(Duration::from_secs(10), || lead.is_connected()));

    subsystem.shutdown();
}

#[test]
fn test_starts_even_while_database_is_down() {
    let (registry, state) = registry_with_state();
    state.fail_next_connects(2);

    let subsystem = DatabaseSubsystem::start(test_config(None), registry).unwrap();
    let lead = subsystem.lead("testdb").unwrap();

    // First attempt failed but still completed: ready does not mean connected
    assert!(subsystem.wait_ready(Duration::from_secs(10)));
    assert!(wait_until(Duration::from_secs(10), || lead.is_connected()));

    subsystem.shutdown();
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_shutdown_fails_queued_queries() {
    // A queue that never starts its threads: everything submitted stays in
    // the FIFO until stop() drains it
    let pending = Arc::new(PendingResultManager::new());
    let queue = DatabaseQueue::lead(
        test_config(None).databases[0].clone(),
        Arc::new(MockEngine::reliable(EngineKind::Sqlite)),
        Arc::clone(&pending),
        test_config(None).queues.clone(),
    )
    .unwrap();

    let slot_a = pending.register("a", Duration::from_secs(30));
    let slot_b = pending.register("b", Duration::from_secs(30));
    queue
        .submit(DatabaseQuery::new(Some("a".into()), Some("SELECT 1".into())))
        .unwrap();
    queue
        .submit(DatabaseQuery::new(Some("b".into()), Some("SELECT 2".into())))
        .unwrap();

    queue.stop();

    assert!(slot_a.wait());
    assert!(!slot_a.take_result().unwrap().success);
    assert!(slot_b.wait());
    assert!(!slot_b.take_result().unwrap().success);
}

#[test]
fn test_shutdown_deadline_bounds_a_stuck_worker() {
    init_tracing();
    let engine = MockEngine::reliable(EngineKind::Sqlite);
    let state = engine.state();
    let pending = Arc::new(PendingResultManager::new());
    let queue = DatabaseQueue::lead(
        test_config(None).databases[0].clone(),
        Arc::new(engine),
        Arc::clone(&pending),
        QueueTuning {
            heartbeat_interval_secs: 1,
            worker_poll_ms: 10,
            min_workers_per_kind: 0,
            max_workers_per_kind: 4,
            shutdown_deadline_secs: 1,
        },
    )
    .unwrap();
    queue.start();
    assert!(wait_until(Duration::from_secs(10), || queue.is_connected()));

    // The next engine call blocks far past the shutdown deadline
    *state.latency.lock() = Duration::from_secs(5);
    queue
        .submit(DatabaseQuery::new(None, Some("SELECT slow_one".into())))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || queue.depth() == 0));

    // A second query is still sitting in the FIFO when stop() runs
    let slot = pending.register("queued", Duration::from_secs(30));
    queue
        .submit(DatabaseQuery::new(
            Some("queued".into()),
            Some("SELECT 2".into()),
        ))
        .unwrap();

    let started = Instant::now();
    queue.stop();
    let elapsed = started.elapsed();

    // The worker was abandoned at the deadline, well before the engine
    // call would have returned, and the queued query's waiter unblocked
    // with a failure
    assert!(elapsed < Duration::from_secs(4), "stop() took {elapsed:?}");
    assert!(slot.wait());
    assert!(!slot.take_result().unwrap().success);
}

#[test]
fn test_double_shutdown_is_safe() {
    let (registry, _) = registry_with_state();
    let subsystem = DatabaseSubsystem::start(test_config(None), registry).unwrap();
    assert!(subsystem.wait_ready(Duration::from_secs(10)));
    subsystem.shutdown();
    subsystem.shutdown();
}

// =============================================================================
// Batch deduplication feeding the request path
// =============================================================================

#[test]
fn test_dedup_batch_then_execute_unique() {
    let (registry, state) = registry_with_state();
    state.respond_with(
        "query_defs",
        json!([
            {"query_ref": 1, "query_type": 999, "query_template": "SELECT :id"},
            {"query_ref": 2, "query_type": 999, "query_template": "SELECT 2"},
        ]),
    );

    let subsystem = DatabaseSubsystem::start(
        test_config(Some("SELECT * FROM query_defs")),
        registry,
    )
    .unwrap();
    let lead = subsystem.lead("testdb").unwrap();
    assert!(wait_until(Duration::from_secs(10), || lead.bootstrap_completed()));

    let batch = vec![
        json!({"query_ref": 1, "params": {"id": 7}}),
        json!({"query_ref": 2}),
        json!({"query_ref": 1, "params": {"id": 7}}),
    ];
    let outcome = deduplicate_and_validate(&batch, "testdb", subsystem.config()).unwrap();
    assert_eq!(outcome.queries.len(), 2);

    // Execute each unique query once; every original position maps to one
    let results: Vec<_> = outcome
        .queries
        .iter()
        .map(|q| {
            let query_ref = q["query_ref"].as_i64().unwrap();
            let params = q.get("params").cloned().unwrap_or(json!({}));
            subsystem.execute_query("testdb", query_ref, &params).unwrap()
        })
        .collect();
    assert!(results.iter().all(|r| r.success));
    for (i, &mapped) in outcome.mapping.iter().enumerate() {
        assert!(mapped < results.len(), "position {i} maps to a result");
    }

    subsystem.shutdown();
}
