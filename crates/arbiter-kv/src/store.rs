use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tracing::trace;

use crate::error::{KvError, Result};

#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    Blob(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

/// Shared in-process KV store. Cheap to clone is not needed — hold it in an
/// `Arc` at the composition root like the other shared subsystems.
#[derive(Default)]
pub struct KvStore {
    entries: DashMap<String, Entry>,
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Atomically add `delta` to the counter at `key`, creating it with
    /// `ttl` when absent or expired. Returns the post-increment value.
    /// The TTL is set only on creation — the window does not slide.
    pub fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                if occ.get().expired(now) {
                    occ.insert(Entry {
                        value: Value::Counter(delta),
                        expires_at: Some(now + ttl),
                    });
                    return Ok(delta);
                }
                match &mut occ.get_mut().value {
                    Value::Counter(n) => {
                        *n += delta;
                        Ok(*n)
                    }
                    Value::Blob(_) => Err(KvError::WrongType {
                        key: key.to_string(),
                    }),
                }
            }
            MapEntry::Vacant(vac) => {
                vac.insert(Entry {
                    value: Value::Counter(delta),
                    expires_at: Some(now + ttl),
                });
                Ok(delta)
            }
        }
    }

    /// Current counter value; 0 when absent or expired.
    pub fn counter(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(e) if !e.expired(now) => match &e.value {
                Value::Counter(n) => Ok(*n),
                Value::Blob(_) => Err(KvError::WrongType {
                    key: key.to_string(),
                }),
            },
            _ => Ok(0),
        }
    }

    /// Store a blob with a TTL, replacing any prior value.
    pub fn set_ex(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Blob(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Set-if-absent with TTL. Returns true when this call created the key —
    /// the at-most-once primitive behind daily alert flags.
    pub fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                if occ.get().expired(now) {
                    occ.insert(Entry {
                        value: Value::Blob(value.to_string()),
                        expires_at: Some(now + ttl),
                    });
                    true
                } else {
                    false
                }
            }
            MapEntry::Vacant(vac) => {
                vac.insert(Entry {
                    value: Value::Blob(value.to_string()),
                    expires_at: Some(now + ttl),
                });
                true
            }
        }
    }

    /// Fetch a blob. Expired entries are dropped on the way out.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(e) if e.expired(now) => true,
            Some(e) => {
                return match &e.value {
                    Value::Blob(s) => Some(s.clone()),
                    Value::Counter(n) => Some(n.to_string()),
                };
            }
            None => return None,
        };
        if expired {
            self.entries
                .remove_if(key, |_, e| e.expired(Instant::now()));
        }
        None
    }

    /// Reset the TTL of a live key (rolling session lifetime).
    /// Returns false when the key is absent or already expired.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut e) if !e.expired(now) => {
                e.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    /// Delete a key. Returns true when a live entry was removed.
    pub fn del(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove_if(key, |_, _| true)
            .map(|(_, e)| !e.expired(now))
            .unwrap_or(false)
    }

    /// Remaining lifetime of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries.get(key).and_then(|e| {
            e.expires_at
                .and_then(|t| t.checked_duration_since(now))
        })
    }

    /// Drop expired entries. Called opportunistically — correctness never
    /// depends on it because every read re-checks expiry.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!(removed, "kv sweep");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
