//! In-memory implementation of the [`Store`] contract.
//!
//! State lives in process memory and is lost on restart. Used by tests and by
//! the `memory` backend setting for single-process deployments. It can inject
//! transient faults to exercise the retry discipline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Store, StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    /// Lists, front is the left end
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
    /// Plain values with their expiry deadline
    values: HashMap<String, (String, Instant)>,
}

impl MemoryState {
    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .values
            .get(key)
            .map(|(_, deadline)| *deadline <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.values.remove(key);
        }
    }
}

/// In-memory store.
///
/// A single lock guards the whole keyspace, which makes every command,
/// including [`Store::move_tail`], atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Number of upcoming commands that fail
    failures_remaining: AtomicU32,
    /// Every command fails while set
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commands fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    /// Make every command fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Snapshot of list `key`, left end first.
    pub async fn list(&self, key: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Expire `key` immediately, as if its TTL had elapsed.
    pub async fn expire_now(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.values.remove(key);
    }

    fn check_fault(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected fault".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn move_tail(&self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        self.check_fault()?;
        let mut state = self.state.lock().await;

        let Some(list) = state.lists.get_mut(source) else {
            return Ok(None);
        };
        let value = list.pop_back();
        if list.is_empty() {
            state.lists.remove(source);
        }

        if let Some(ref value) = value {
            state
                .lists
                .entry(destination.to_string())
                .or_default()
                .push_front(value.clone());
        }

        Ok(value)
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<usize> {
        self.check_fault()?;
        let mut state = self.state.lock().await;

        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };

        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() };
        let mut removed = 0;

        if count >= 0 {
            let mut index = 0;
            while index < list.len() && removed < limit {
                if list[index] == value {
                    list.remove(index);
                    removed += 1;
                } else {
                    index += 1;
                }
            }
        } else {
            let mut index = list.len();
            while index > 0 && removed < limit {
                index -= 1;
                if list[index] == value {
                    list.remove(index);
                    removed += 1;
                }
            }
        }

        if list.is_empty() {
            state.lists.remove(key);
        }

        Ok(removed)
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map(|list| list.len()).unwrap_or(0))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        let list = state.lists.remove(key).is_some();
        let set = state.sets.remove(key).is_some();
        let value = state.values.remove(key).is_some();
        Ok(list || set || value)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state
            .values
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        state.purge_expired(key);
        Ok(state.values.contains_key(key)
            || state.lists.contains_key(key)
            || state.sets.contains_key(key))
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_fault()?;
        let mut state = self.state.lock().await;
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_fault()?;
        let mut state = self.state.lock().await;

        let Some(set) = state.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            state.sets.remove(key);
        }

        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_fault()?;
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
