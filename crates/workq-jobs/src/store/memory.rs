//! In-process sorted-set store.

use super::{glob_match, Promotion, SortedSetStore};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Total-ordered wrapper for scores.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

/// One sorted set. Equal scores keep insertion order.
#[derive(Debug, Default)]
struct SortedSet {
    members: HashMap<String, (Score, u64)>,
    order: BTreeSet<(Score, u64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64, seq: u64) {
        self.remove(member);
        self.members.insert(member.to_string(), (Score(score), seq));
        self.order.insert((Score(score), seq, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some((score, seq)) => {
                self.order.remove(&(score, seq, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn pop_first(&mut self) -> Option<(String, f64)> {
        let (score, _, member) = self.order.pop_first()?;
        self.members.remove(&member);
        Some((member, score.0))
    }

    fn range(&self, min: f64, max: f64, limit: Option<usize>) -> Vec<String> {
        self.order
            .iter()
            .skip_while(|(score, _, _)| score.0 < min)
            .take_while(|(score, _, _)| score.0 <= max)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, _, member)| member.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    sets: HashMap<String, SortedSet>,
    seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Fields read from an entry when promoting it.
#[derive(Deserialize)]
struct PromotionTarget {
    queue_name: String,
    priority: f64,
}

/// Sorted-set store kept in process memory.
///
/// Every operation runs under one lock, so each is atomic. Connectivity can
/// be toggled to exercise outage handling.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    connected: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            connected: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    /// Creates an empty, connected store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going away or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> JobResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(JobError::NotConnected("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl SortedSetStore for MemoryStore {
    async fn add(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member, score, seq);
        Ok(())
    }

    async fn pop_min(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock();
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(None);
        };
        let popped = set.pop_first();
        if set.members.is_empty() {
            inner.sets.remove(key);
        }
        Ok(popped)
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> JobResult<Vec<String>> {
        self.ensure_connected()?;
        let inner = self.inner.lock();
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.range(min, max, limit))
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str, member: &str) -> JobResult<bool> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock();
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.members.is_empty() {
            inner.sets.remove(key);
        }
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> JobResult<u64> {
        self.ensure_connected()?;
        let inner = self.inner.lock();
        Ok(inner.sets.get(key).map_or(0, |set| set.members.len() as u64))
    }

    async fn keys(&self, pattern: &str) -> JobResult<Vec<String>> {
        self.ensure_connected()?;
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .sets
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> JobResult<bool> {
        self.ensure_connected()?;
        Ok(self.inner.lock().sets.remove(key).is_some())
    }

    async fn promote_due(
        &self,
        delayed_key: &str,
        queue_key_prefix: &str,
        now: f64,
        limit: usize,
    ) -> JobResult<Promotion> {
        self.ensure_connected()?;
        let mut inner = self.inner.lock();

        let due = inner
            .sets
            .get(delayed_key)
            .map(|set| set.range(f64::NEG_INFINITY, now, Some(limit)))
            .unwrap_or_default();

        let mut promotion = Promotion::default();
        for member in due {
            if let Some(set) = inner.sets.get_mut(delayed_key) {
                set.remove(&member);
            }

            match serde_json::from_str::<PromotionTarget>(&member) {
                Ok(target) if !target.queue_name.is_empty() => {
                    let seq = inner.next_seq();
                    inner
                        .sets
                        .entry(format!("{queue_key_prefix}{}", target.queue_name))
                        .or_default()
                        .insert(&member, target.priority, seq);
                    promotion.moved += 1;
                }
                _ => promotion.dropped += 1,
            }
        }

        if inner
            .sets
            .get(delayed_key)
            .is_some_and(|set| set.members.is_empty())
        {
            inner.sets.remove(delayed_key);
        }

        Ok(promotion)
    }

    async fn ping(&self) -> JobResult<()> {
        self.ensure_connected()
    }

    async fn reconnect(&self) -> JobResult<()> {
        self.ensure_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pop_min_orders_by_score_then_insertion() {
        let store = MemoryStore::new();
        store.add("q", "b", 5.0).await.unwrap();
        store.add("q", "a", 1.0).await.unwrap();
        store.add("q", "c", 5.0).await.unwrap();

        assert_eq!(store.pop_min("q").await.unwrap(), Some(("a".into(), 1.0)));
        assert_eq!(store.pop_min("q").await.unwrap(), Some(("b".into(), 5.0)));
        assert_eq!(store.pop_min("q").await.unwrap(), Some(("c".into(), 5.0)));
        assert_eq!(store.pop_min("q").await.unwrap(), None);
        assert_eq!(store.cardinality("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_existing_member_updates_score() {
        let store = MemoryStore::new();
        store.add("q", "a", 1.0).await.unwrap();
        store.add("q", "a", 9.0).await.unwrap();
        assert_eq!(store.cardinality("q").await.unwrap(), 1);
        assert_eq!(store.range_by_score("q", 5.0, 10.0, None).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let store = MemoryStore::new();
        store.add("p:queue:a", "x", 1.0).await.unwrap();
        store.add("p:queue:b", "x", 1.0).await.unwrap();
        store.add("p:delayed", "x", 1.0).await.unwrap();

        assert_eq!(
            store.keys("p:queue:*").await.unwrap(),
            vec!["p:queue:a".to_string(), "p:queue:b".to_string()]
        );
        assert!(store.delete("p:queue:a").await.unwrap());
        assert!(!store.delete("p:queue:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_promote_due_moves_and_drops() {
        let store = MemoryStore::new();
        let ready = r#"{"job_id":"1","queue_name":"email","priority":3}"#;
        let later = r#"{"job_id":"2","queue_name":"email","priority":1}"#;
        store.add("d", ready, 100.0).await.unwrap();
        store.add("d", "not json", 50.0).await.unwrap();
        store.add("d", later, 500.0).await.unwrap();

        let promotion = store.promote_due("d", "p:queue:", 200.0, 100).await.unwrap();
        assert_eq!(promotion, Promotion { moved: 1, dropped: 1 });
        assert_eq!(store.pop_min("p:queue:email").await.unwrap(), Some((ready.into(), 3.0)));
        assert_eq!(store.cardinality("d").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_promote_due_respects_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let member = format!(r#"{{"job_id":"{i}","queue_name":"q","priority":1}}"#);
            store.add("d", &member, f64::from(i)).await.unwrap();
        }
        let promotion = store.promote_due("d", "p:queue:", 10.0, 2).await.unwrap();
        assert_eq!(promotion.moved, 2);
        assert_eq!(store.cardinality("d").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_offline_store_fails_closed() {
        let store = MemoryStore::new();
        store.set_connected(false);
        assert!(matches!(store.ping().await, Err(JobError::NotConnected(_))));
        assert!(store.add("q", "a", 1.0).await.is_err());
        assert!(store.reconnect().await.is_err());

        store.set_connected(true);
        assert!(store.reconnect().await.is_ok());
    }
}
