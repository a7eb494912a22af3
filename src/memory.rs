use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::QueryError;
use crate::store::KvStore;

/// In-process store holding strings, hashes and sets.
///
/// Every read counts as one round trip, which lets callers check how many
/// requests an operation issued.
#[derive(Debug, Default)]
pub struct MemoryStore {
    strings: BTreeMap<String, String>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    sets: BTreeMap<String, BTreeSet<String>>,
    round_trips: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.strings.insert(key.into(), value.into());
        self
    }

    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.hashes
            .entry(key.into())
            .or_default()
            .insert(field.into(), value.into());
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.sets.entry(key.into()).or_default().insert(member.into());
        self
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Relaxed)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::Relaxed);
    }

    fn record(&self) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, QueryError> {
        self.record();
        Ok(self.strings.get(key).cloned())
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        self.record();
        Ok(keys.iter().map(|key| self.strings.get(key).cloned()).collect())
    }

    fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        self.record();
        let hash = self.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|hash| hash.get(field)).cloned())
            .collect())
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, QueryError> {
        self.record();
        Ok(self.hashes.get(key).cloned().unwrap_or_default())
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, QueryError> {
        self.record();
        Ok(self.sets.get(key).cloned().unwrap_or_default())
    }

    fn hlen(&self, key: &str) -> Result<u64, QueryError> {
        self.record();
        Ok(self.hashes.get(key).map(|hash| hash.len() as u64).unwrap_or(0))
    }
}
