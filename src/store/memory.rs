use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::store::{keys, QueueStore};

/// String value with an optional lifetime, expired lazily on read
struct ExpiringValue {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl ExpiringValue {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Default)]
struct Inner {
    lists: RwLock<HashMap<String, VecDeque<String>>>,
    strings: RwLock<HashMap<String, ExpiringValue>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
    counters: RwLock<HashMap<String, u64>>,
    push_notify: Notify,
}

/// In-memory store for testing and development.
///
/// Pops race through the same locks a shared store would arbitrate, so
/// at-most-once dequeue holds across concurrent workers in one process.
/// Key expiry is lazy: expired entries are dropped when next read.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pop_first(&self, queues: &[String]) -> Option<(String, String)> {
        let mut lists = self.inner.lists.write();
        for queue in queues {
            if let Some(list) = lists.get_mut(&keys::queue(queue)) {
                if let Some(payload) = list.pop_front() {
                    return Some((queue.clone(), payload));
                }
            }
        }
        None
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        {
            let mut lists = self.inner.lists.write();
            lists
                .entry(keys::queue(queue))
                .or_default()
                .push_back(payload.to_string());
        }
        self.inner
            .sets
            .write()
            .entry(keys::QUEUES.to_string())
            .or_default()
            .insert(queue.to_string());
        self.inner.push_notify.notify_one();
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>> {
        let mut lists = self.inner.lists.write();
        Ok(lists
            .get_mut(&keys::queue(queue))
            .and_then(|list| list.pop_front()))
    }

    async fn blocking_pop(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>> {
        if timeout.is_zero() {
            return Ok(self.pop_first(queues));
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before the pass so a concurrent push
            // between pass and await is not lost.
            let notified = self.inner.push_notify.notified();
            if let Some(hit) = self.pop_first(queues) {
                return Ok(Some(hit));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn size(&self, queue: &str) -> Result<u64> {
        let lists = self.inner.lists.read();
        Ok(lists.get(&keys::queue(queue)).map_or(0, |l| l.len() as u64))
    }

    async fn queue_names(&self) -> Result<Vec<String>> {
        let sets = self.inner.sets.read();
        Ok(sets
            .get(keys::QUEUES)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_queue(&self, queue: &str) -> Result<()> {
        self.inner.lists.write().remove(&keys::queue(queue));
        if let Some(set) = self.inner.sets.write().get_mut(keys::QUEUES) {
            set.remove(queue);
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let mut strings = self.inner.strings.write();
        match strings.get(key) {
            Some(entry) if entry.expired(now) => {
                strings.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.inner.strings.write().insert(
            key.to_string(),
            ExpiringValue {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn write_expiring(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Internal(format!("ttl out of range: {e}")))?;
        self.inner.strings.write().insert(
            key.to_string(),
            ExpiringValue {
                value: value.to_string(),
                expires_at: Some(Utc::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.strings.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.inner
            .sets
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(set) = self.inner.sets.write().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let sets = self.inner.sets.read();
        Ok(sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut counters = self.inner.counters.write();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        Ok(self.inner.counters.read().get(key).copied().unwrap_or(0))
    }

    async fn clear_counter(&self, key: &str) -> Result<()> {
        self.inner.counters.write().remove(key);
        Ok(())
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lists
            .write()
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let lists = self.inner.lists.read();
        Ok(lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn list_items(&self, key: &str) -> Result<Vec<String>> {
        let lists = self.inner.lists.read();
        Ok(lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_clear(&self, key: &str) -> Result<()> {
        self.inner.lists.write().remove(key);
        Ok(())
    }
}
