//! Prepared-Statement LRU Cache
//!
//! A capacity-bounded cache of prepared statements kept per connection,
//! generic over the engine's opaque statement handle type. Recency is
//! tracked with a parallel array of monotonically increasing counters:
//! every insert or touch stamps the entry with the next counter value, and
//! eviction scans for the minimum.
//!
//! LRU-by-counter-scan trades O(n) eviction for allocation-free bookkeeping.
//! That is the intended operating point: these caches hold tens of
//! statements per connection, not thousands, and this is explicitly not a
//! general-purpose high-throughput LRU.

/// A cached prepared statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement<H> {
    pub name: String,
    pub sql_template: String,
    /// Engine-issued opaque handle
    pub handle: H,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub usage_count: u64,
}

/// Bounded LRU cache of prepared statements for one connection
#[derive(Debug)]
pub struct PreparedStatementCache<H> {
    statements: Vec<PreparedStatement<H>>,
    /// Parallel recency stamps; statements[i] was last used at lru_counters[i]
    lru_counters: Vec<u64>,
    next_counter: u64,
    capacity: usize,
}

impl<H> PreparedStatementCache<H> {
    /// Create a cache holding at most `capacity` statements.
    /// A capacity of 0 is clamped to 1 so insertion always succeeds.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        PreparedStatementCache {
            statements: Vec::with_capacity(capacity),
            lru_counters: Vec::with_capacity(capacity),
            next_counter: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn stamp(&mut self) -> u64 {
        let c = self.next_counter;
        self.next_counter += 1;
        c
    }

    /// Look up a statement by name, bumping its recency and usage count
    pub fn touch(&mut self, name: &str) -> Option<&H> {
        let idx = self.statements.iter().position(|s| s.name == name)?;
        let counter = self.stamp();
        self.lru_counters[idx] = counter;
        self.statements[idx].usage_count += 1;
        Some(&self.statements[idx].handle)
    }

    /// Look up without touching recency
    pub fn get(&self, name: &str) -> Option<&PreparedStatement<H>> {
        self.statements.iter().find(|s| s.name == name)
    }

    /// Insert a freshly prepared statement.
    ///
    /// If the cache is at capacity the least-recently-used entry is removed
    /// first and returned so the caller can close its native handle. The
    /// surviving entries keep their relative order.
    pub fn insert(&mut self, name: String, sql_template: String, handle: H) -> Option<PreparedStatement<H>> {
        let evicted = if self.statements.len() >= self.capacity {
            let min_idx = self
                .lru_counters
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| **c)
                .map(|(i, _)| i)?;
            self.lru_counters.remove(min_idx);
            Some(self.statements.remove(min_idx))
        } else {
            None
        };

        let counter = self.stamp();
        self.statements.push(PreparedStatement {
            name,
            sql_template,
            handle,
            created_at: chrono::Utc::now(),
            usage_count: 0,
        });
        self.lru_counters.push(counter);

        evicted
    }

    /// Remove a statement by name, returning it for native close.
    /// Absent names return None; there is no bookkeeping to undo for a
    /// statement that was never cached.
    pub fn remove(&mut self, name: &str) -> Option<PreparedStatement<H>> {
        let idx = self.statements.iter().position(|s| s.name == name)?;
        self.lru_counters.remove(idx);
        Some(self.statements.remove(idx))
    }

    /// Drain every statement (connection teardown)
    pub fn drain(&mut self) -> Vec<PreparedStatement<H>> {
        self.lru_counters.clear();
        std::mem::take(&mut self.statements)
    }

    /// Statement names in cache order (oldest insertion first among survivors)
    pub fn names(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.name.as_str()).collect()
    }
}
