//! Request-Scoped Query Deduplication
//!
//! Collapses structurally identical queries (same `query_ref`, deeply equal
//! `params`) within one request batch into a single execution, so a handler
//! can run each unique query once and broadcast the result to every original
//! position that mapped to it.
//!
//! Rate limiting is applied after deduplication: callers who legitimately
//! repeat a query are not penalized for the repeats.

use serde_json::Value;

use crate::config::Config;
use crate::error::DedupError;

/// The result of deduplicating one request batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    /// Unique queries, in first-occurrence order
    pub queries: Vec<Value>,
    /// For each input index, the index of its query in `queries`.
    /// Malformed (dropped) inputs map to `usize::MAX`.
    pub mapping: Vec<usize>,
    /// True for inputs that were duplicates or malformed
    pub is_duplicate: Vec<bool>,
}

/// Position marker for inputs with no deduplicated counterpart
pub const DROPPED: usize = usize::MAX;

/// Deduplicate and rate-limit a batch of query objects.
///
/// Each well-formed input is an object with an integer `query_ref` and an
/// optional `params` object (missing `params` is treated as `{}`). Anything
/// else — non-objects, missing or non-integer `query_ref` — is marked as a
/// duplicate and silently dropped rather than failing the whole batch.
///
/// Fails with [`DedupError::DatabaseNotFound`] for an unconfigured database
/// and [`DedupError::RateLimit`] when the count of unique queries exceeds
/// the database's `max_queries_per_request`.
pub fn deduplicate_and_validate(
    queries: &[Value],
    database: &str,
    config: &Config,
) -> Result<DedupOutcome, DedupError> {
    let db_config = config
        .database(database)
        .ok_or_else(|| DedupError::DatabaseNotFound(database.to_string()))?;

    if queries.is_empty() {
        return Ok(DedupOutcome {
            queries: Vec::new(),
            mapping: Vec::new(),
            is_duplicate: Vec::new(),
        });
    }

    let empty_params = Value::Object(serde_json::Map::new());

    // (query_ref, params, index into outcome.queries)
    let mut unique: Vec<(i64, &Value, usize)> = Vec::new();
    let mut outcome = DedupOutcome {
        queries: Vec::new(),
        mapping: vec![DROPPED; queries.len()],
        is_duplicate: vec![false; queries.len()],
    };

    for (i, query) in queries.iter().enumerate() {
        let Some(obj) = query.as_object() else {
            outcome.is_duplicate[i] = true;
            continue;
        };
        let Some(query_ref) = obj.get("query_ref").and_then(Value::as_i64) else {
            outcome.is_duplicate[i] = true;
            continue;
        };

        let params = obj.get("params").unwrap_or(&empty_params);

        // serde_json object equality is key-order-insensitive
        if let Some(&(_, _, idx)) = unique
            .iter()
            .find(|(r, p, _)| *r == query_ref && *p == params)
        {
            outcome.is_duplicate[i] = true;
            outcome.mapping[i] = idx;
            continue;
        }

        let idx = outcome.queries.len();
        outcome.queries.push(query.clone());
        outcome.mapping[i] = idx;
        unique.push((query_ref, params, idx));
    }

    if outcome.queries.len() > db_config.max_queries_per_request {
        return Err(DedupError::RateLimit {
            unique: outcome.queries.len(),
            max: db_config.max_queries_per_request,
            database: database.to_string(),
        });
    }

    Ok(outcome)
}
