//! Keyed, expiring challenge storage
//!
//! Both authentication protocols keep their outstanding challenges behind
//! `ChallengeStore`. Every conditional mutation (`take_if`, `replace_if`)
//! runs its predicate and its write under one lock, which is what makes a
//! signed message or a repo code single-use under concurrency.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

/// Anything stored in a `ChallengeStore` knows when it stops being valid.
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

pub trait ChallengeStore<V>: Send + Sync
where
    V: Expiring + Clone + Send,
{
    /// Current entry for `key`, if one exists and has not expired.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V>;

    /// Store `value`, replacing whatever was there. Returns the replaced
    /// entry (expired or not).
    fn put(&self, key: &str, value: V) -> Option<V>;

    /// Atomic compare-and-delete: removes and returns the live entry only
    /// if `predicate` holds for it.
    fn take_if(&self, key: &str, now: DateTime<Utc>, predicate: &dyn Fn(&V) -> bool)
        -> Option<V>;

    /// Atomic compare-and-swap: replaces the live entry with `value` only if
    /// `predicate` holds. Returns the previous entry on success.
    fn replace_if(
        &self,
        key: &str,
        now: DateTime<Utc>,
        predicate: &dyn Fn(&V) -> bool,
        value: V,
    ) -> Option<V>;

    /// Insert only when no live entry exists for `key`.
    fn put_if_absent(&self, key: &str, now: DateTime<Utc>, value: V) -> bool;

    /// Drop every expired entry. Returns how many were removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a single mutex-guarded map.
#[derive(Debug)]
pub struct MemoryChallengeStore<V> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V> MemoryChallengeStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryChallengeStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ChallengeStore<V> for MemoryChallengeStore<V>
where
    V: Expiring + Clone + Send,
{
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.lock();
        entries.get(key).filter(|v| !v.is_expired(now)).cloned()
    }

    fn put(&self, key: &str, value: V) -> Option<V> {
        self.entries.lock().insert(key.to_string(), value)
    }

    fn take_if(
        &self,
        key: &str,
        now: DateTime<Utc>,
        predicate: &dyn Fn(&V) -> bool,
    ) -> Option<V> {
        let mut entries = self.entries.lock();
        let matches = entries
            .get(key)
            .map(|v| !v.is_expired(now) && predicate(v))
            .unwrap_or(false);
        if matches {
            entries.remove(key)
        } else {
            None
        }
    }

    fn replace_if(
        &self,
        key: &str,
        now: DateTime<Utc>,
        predicate: &dyn Fn(&V) -> bool,
        value: V,
    ) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(current) if !current.is_expired(now) && predicate(current) => {
                Some(std::mem::replace(current, value))
            }
            _ => None,
        }
    }

    fn put_if_absent(&self, key: &str, now: DateTime<Utc>, value: V) -> bool {
        let mut entries = self.entries.lock();
        let occupied = entries
            .get(key)
            .map(|v| !v.is_expired(now))
            .unwrap_or(false);
        if occupied {
            return false;
        }
        entries.insert(key.to_string(), value);
        true
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired challenges", removed);
        }
        removed
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
