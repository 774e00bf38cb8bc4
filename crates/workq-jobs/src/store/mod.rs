//! Sorted-set store abstraction.
//!
//! The queue engine needs nothing from its store beyond ordered-set
//! primitives, a liveness probe and one atomic promotion step.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{create_pool, RedisStore};

use crate::error::JobResult;
use async_trait::async_trait;

/// Result of one delayed-set promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Promotion {
    /// Entries moved into their queue.
    pub moved: u64,
    /// Due entries removed because they could not be decoded.
    pub dropped: u64,
}

/// Ordered-set operations the engine runs against.
#[async_trait]
pub trait SortedSetStore: Send + Sync + std::fmt::Debug {
    /// Adds `member` with `score`, replacing the score of an existing member.
    async fn add(&self, key: &str, member: &str, score: f64) -> JobResult<()>;

    /// Atomically removes and returns the lowest-score member.
    async fn pop_min(&self, key: &str) -> JobResult<Option<(String, f64)>>;

    /// Members with `min <= score <= max`, lowest first.
    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> JobResult<Vec<String>>;

    /// Removes one member. Returns true if it was present.
    async fn remove(&self, key: &str, member: &str) -> JobResult<bool>;

    /// Number of members.
    async fn cardinality(&self, key: &str) -> JobResult<u64>;

    /// Keys matching a glob-style pattern (`*` wildcard).
    async fn keys(&self, pattern: &str) -> JobResult<Vec<String>>;

    /// Deletes a whole set. Returns true if it existed.
    async fn delete(&self, key: &str) -> JobResult<bool>;

    /// Atomically moves up to `limit` members of `delayed_key` with
    /// `score <= now` into `{queue_key_prefix}{entry.queue_name}`, scored by
    /// `entry.priority`. Undecodable due members are removed and counted.
    async fn promote_due(
        &self,
        delayed_key: &str,
        queue_key_prefix: &str,
        now: f64,
        limit: usize,
    ) -> JobResult<Promotion>;

    /// Liveness probe.
    async fn ping(&self) -> JobResult<()>;

    /// Re-establishes the connection.
    async fn reconnect(&self) -> JobResult<()>;
}

/// Key builder for the queue's sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Sorted set of pending entries for one queue, scored by priority.
    pub fn queue(&self, queue_name: &str) -> String {
        format!("{}{}", self.queue_prefix(), queue_name)
    }

    /// Common prefix of every queue key.
    pub fn queue_prefix(&self) -> String {
        format!("{}:queue:", self.prefix)
    }

    /// Pattern matching every queue key.
    pub fn queue_pattern(&self) -> String {
        format!("{}*", self.queue_prefix())
    }

    /// Queue name encoded in a queue key.
    pub fn queue_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.queue_prefix())
    }

    /// Shared delayed set, scored by ready-at Unix time.
    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::new("workq")
    }
}

/// Glob match supporting `*` only, as used by key listing.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return candidate.is_empty();
    };
    let Some(mut rest) = candidate.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    let Some((last, middle)) = remaining.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys() {
        let keys = QueueKeys::new("test");

        assert_eq!(keys.queue("default"), "test:queue:default");
        assert_eq!(keys.delayed(), "test:delayed");
        assert_eq!(keys.queue_pattern(), "test:queue:*");
        assert_eq!(keys.queue_name("test:queue:email"), Some("email"));
        assert_eq!(keys.queue_name("test:delayed"), None);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("workq:queue:*", "workq:queue:email"));
        assert!(glob_match("workq:queue:*", "workq:queue:"));
        assert!(!glob_match("workq:queue:*", "workq:delayed"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcd"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
