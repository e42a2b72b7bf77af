//! In-process store backend
//!
//! A single tokio Mutex over the whole state keeps every primitive atomic
//! with respect to the others, the same way a networked backend executes
//! each command atomically. Expiry is lazy: expired keys are dropped when
//! they are next touched.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::store::{Store, StoreFuture};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    counters: HashMap<String, i64>,
    windows: HashMap<String, Vec<(u64, String)>>,
    queues: HashMap<String, VecDeque<String>>,
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.keys.get(key).is_some_and(Entry::expired) {
                inner.keys.remove(key);
            }
            Ok(inner.keys.get(key).map(|e| e.value.clone()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.keys.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
            Ok(())
        })
    }

    fn set_nx<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.keys.get(key).is_some_and(Entry::expired) {
                inner.keys.remove(key);
            }
            if inner.keys.contains_key(key) {
                return Ok(false);
            }
            inner.keys.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
            Ok(true)
        })
    }

    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let existed = inner
                .keys
                .remove(key)
                .is_some_and(|e| !e.expired());
            Ok(existed)
        })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let counter = inner.counters.entry(key.to_string()).or_insert(0);
            *counter += 1;
            Ok(*counter)
        })
    }

    fn decr_floor<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let counter = inner.counters.entry(key.to_string()).or_insert(0);
            *counter = (*counter - 1).max(0);
            Ok(*counter)
        })
    }

    fn counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner.counters.get(key).copied().unwrap_or(0))
        })
    }

    fn window_add<'a>(
        &'a self,
        key: &'a str,
        member: &'a str,
        timestamp_ms: u64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .windows
                .entry(key.to_string())
                .or_default()
                .push((timestamp_ms, member.to_string()));
            Ok(())
        })
    }

    fn window_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let Some(window) = inner.windows.get_mut(key) else {
                return Ok(false);
            };
            let before = window.len();
            // Exactly one removal even if a member were duplicated
            if let Some(pos) = window.iter().position(|(_, m)| m == member) {
                window.remove(pos);
            }
            Ok(window.len() < before)
        })
    }

    fn window_count<'a>(&'a self, key: &'a str, min_timestamp_ms: u64) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let Some(window) = inner.windows.get_mut(key) else {
                return Ok(0);
            };
            window.retain(|(ts, _)| *ts >= min_timestamp_ms);
            Ok(window.len() as u64)
        })
    }

    fn queue_push<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .queues
                .entry(key.to_string())
                .or_default()
                .push_back(value.to_string());
            Ok(())
        })
    }

    fn queue_push_front<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .queues
                .entry(key.to_string())
                .or_default()
                .push_front(value.to_string());
            Ok(())
        })
    }

    fn queue_pop<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            Ok(inner.queues.get_mut(key).and_then(VecDeque::pop_front))
        })
    }

    fn queue_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner.queues.get(key).map_or(0, |q| q.len() as u64))
        })
    }

    fn clear_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let mut removed = 0u64;
            for map_len in [
                drain_prefix(&mut inner.keys, prefix),
                drain_prefix(&mut inner.counters, prefix),
                drain_prefix(&mut inner.windows, prefix),
                drain_prefix(&mut inner.queues, prefix),
            ] {
                removed += map_len;
            }
            Ok(removed)
        })
    }
}

fn drain_prefix<V>(map: &mut HashMap<String, V>, prefix: &str) -> u64 {
    let before = map.len();
    map.retain(|k, _| !k.starts_with(prefix));
    (before - map.len()) as u64
}
