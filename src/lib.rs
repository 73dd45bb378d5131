//! # hydroqueue
//!
//! Per-database query queue and connection-pooling core for a
//! multi-protocol server. Each configured database gets a Lead queue with
//! dedicated worker and heartbeat threads; the Lead bootstraps a query
//! table cache from the database's own query-definition rows, tracks
//! migration watermarks, and spawns typed worker queues (slow, medium,
//! fast, cache) as load demands.
//!
//! ## Architecture
//!
//! - **Engines** ([`engine`]): a trait pair (`DatabaseEngine` /
//!   `EngineConnection`) abstracting PostgreSQL, MySQL, SQLite, and DB2
//!   behind one interface, with a scriptable mock for tests
//! - **Queues** ([`queue`]): per-database Lead and worker queues, FIFO
//!   submission, heartbeat-driven connection management
//! - **Query table cache** ([`query_cache`]): `query_ref` to SQL-template
//!   resolution, loaded at bootstrap
//! - **Pending results** ([`pending`]): condvar slots handing results back
//!   to suspended submitters, signaled exactly once
//! - **Pools** ([`pool`]): reusable connections keyed by a CRC32 of the
//!   connection string, with time-based idle eviction
//! - **Request plumbing** ([`dedup`], [`params`]): batch deduplication,
//!   post-dedup rate limiting, and named-to-positional parameter
//!   conversion
//! - **Subsystem** ([`subsystem`]): the composition root owning all of the
//!   above, with no process-global state
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hydroqueue::engine::mock::MockEngine;
//! use hydroqueue::engine::{EngineKind, EngineRegistry};
//! use hydroqueue::{Config, DatabaseSubsystem};
//!
//! # fn main() -> Result<(), hydroqueue::DbError> {
//! let config = Config::load()?;
//! let mut registry = EngineRegistry::new();
//! registry.register(Arc::new(MockEngine::reliable(EngineKind::Sqlite)));
//!
//! let subsystem = DatabaseSubsystem::start(config, registry)?;
//! subsystem.wait_ready(Duration::from_secs(10));
//!
//! let result = subsystem.execute_query(
//!     "acuranzo",
//!     42,
//!     &serde_json::json!({"id": 7}),
//! )?;
//! println!("{} rows", result.row_count);
//!
//! subsystem.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connstring;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod params;
pub mod pending;
pub mod pool;
pub mod prepared;
pub mod query_cache;
pub mod queue;
pub mod subsystem;

pub use config::{Config, DatabaseConfig, LoggingConfig, PoolConfig, QueueTuning};
pub use error::{CacheError, DbError, DbResult, DedupError, ParamError};
pub use subsystem::DatabaseSubsystem;
