use std::iter::FusedIterator;

use tracing::debug;

use crate::error::QueryError;
use crate::keyspace;
use crate::store::KvStore;

/// Batch size used when the caller does not configure one.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// How one batch of items is turned into a store request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchVerb {
    /// `MGET` over `<namespace>:<prefix>:<item>` (or `<namespace>:<item>`).
    Keys {
        namespace: String,
        prefix: Option<String>,
    },
    /// `HMGET` of the items as fields of one hash.
    HashFields { key: String },
}

impl BatchVerb {
    pub fn keys(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        BatchVerb::Keys {
            namespace: namespace.into(),
            prefix: Some(prefix.into()),
        }
    }

    pub fn hash_fields(key: impl Into<String>) -> Self {
        BatchVerb::HashFields { key: key.into() }
    }

    fn name(&self) -> &'static str {
        match self {
            BatchVerb::Keys { .. } => "MGET",
            BatchVerb::HashFields { .. } => "HMGET",
        }
    }

    fn store_key(&self, item: &str) -> String {
        match self {
            BatchVerb::Keys {
                namespace,
                prefix: Some(prefix),
            } => keyspace::key(namespace, &format!("{prefix}:{item}")),
            BatchVerb::Keys {
                namespace,
                prefix: None,
            } => keyspace::key(namespace, item),
            BatchVerb::HashFields { .. } => item.to_string(),
        }
    }
}

/// One round trip: the requested items and their values, position for position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub keys: Vec<String>,
    pub values: Vec<Option<String>>,
}

impl Batch {
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Option<String>)> {
        self.keys.into_iter().zip(self.values)
    }
}

/// Lazy sequence of batches over an item iterator.
///
/// Each call to `next` issues exactly one request. The first error ends the
/// sequence.
pub struct Buffered<'a, S: ?Sized, I> {
    store: &'a S,
    items: I,
    verb: BatchVerb,
    batch_size: usize,
    done: bool,
}

pub fn buffered<S, I>(
    store: &S,
    items: I,
    verb: BatchVerb,
    batch_size: usize,
) -> Result<Buffered<'_, S, I::IntoIter>, QueryError>
where
    S: KvStore + ?Sized,
    I: IntoIterator,
    I::Item: Into<String>,
{
    if batch_size == 0 {
        return Err(QueryError::InvalidBatchSize(batch_size));
    }
    Ok(Buffered {
        store,
        items: items.into_iter(),
        verb,
        batch_size,
        done: false,
    })
}

impl<S, I> Buffered<'_, S, I>
where
    S: KvStore + ?Sized,
    I: Iterator,
    I::Item: Into<String>,
{
    fn request(&self, keys: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        match &self.verb {
            BatchVerb::Keys { .. } => {
                let store_keys = keys
                    .iter()
                    .map(|item| self.verb.store_key(item))
                    .collect::<Vec<_>>();
                self.store.mget(&store_keys)
            }
            BatchVerb::HashFields { key } => self.store.hmget(key, keys),
        }
    }

    /// Drains the sequence into `(item, value)` pairs in input order.
    pub fn collect_pairs(self) -> Result<Vec<(String, Option<String>)>, QueryError> {
        let mut pairs = Vec::new();
        for batch in self {
            pairs.extend(batch?.into_pairs());
        }
        Ok(pairs)
    }
}

impl<S, I> Iterator for Buffered<'_, S, I>
where
    S: KvStore + ?Sized,
    I: Iterator,
    I::Item: Into<String>,
{
    type Item = Result<Batch, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let keys = self
            .items
            .by_ref()
            .take(self.batch_size)
            .map(Into::into)
            .collect::<Vec<String>>();
        if keys.is_empty() {
            self.done = true;
            return None;
        }
        if keys.len() < self.batch_size {
            self.done = true;
        }

        debug!(verb = self.verb.name(), items = keys.len(), "batch request");
        match self.request(&keys) {
            Ok(values) if values.len() == keys.len() => Some(Ok(Batch { keys, values })),
            Ok(values) => {
                self.done = true;
                Some(Err(QueryError::StoreResponse {
                    verb: self.verb.name().to_string(),
                    message: format!("expected {} values, got {}", keys.len(), values.len()),
                }))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<S, I> FusedIterator for Buffered<'_, S, I>
where
    S: KvStore + ?Sized,
    I: Iterator,
    I::Item: Into<String>,
{
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn batches_cover_input_in_order() {
        let store = MemoryStore::new();
        let items = (0..7).map(|i| format!("S{i}")).collect::<Vec<_>>();
        let batches = buffered(&store, items.clone(), BatchVerb::keys("C", "data"), 3)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let lengths = batches.iter().map(|batch| batch.keys.len()).collect::<Vec<_>>();
        assert_eq!(lengths, vec![3, 3, 1]);
        let flattened = batches
            .into_iter()
            .flat_map(|batch| batch.keys)
            .collect::<Vec<_>>();
        assert_eq!(flattened, items);
        assert_eq!(store.round_trips(), 3);
    }

    #[test]
    fn exact_multiple_issues_no_trailing_request() {
        let store = MemoryStore::new();
        let count = buffered(&store, ["a", "b", "c", "d"], BatchVerb::keys("C", "data"), 2)
            .unwrap()
            .count();
        assert_eq!(count, 2);
        assert_eq!(store.round_trips(), 2);
    }

    #[test]
    fn empty_input_issues_nothing() {
        let store = MemoryStore::new();
        let items: Vec<String> = Vec::new();
        let mut batches = buffered(&store, items, BatchVerb::hash_fields("h"), 5).unwrap();
        assert!(batches.next().is_none());
        assert_eq!(store.round_trips(), 0);
    }

    #[test]
    fn values_follow_keys_with_missing_as_none() {
        let mut store = MemoryStore::new();
        store.set("C:data:S1", "0\t5");
        let pairs = buffered(&store, ["S1", "S2"], BatchVerb::keys("C", "data"), 10)
            .unwrap()
            .collect_pairs()
            .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("S1".to_string(), Some("0\t5".to_string())),
                ("S2".to_string(), None),
            ]
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let store = MemoryStore::new();
        let result = buffered(&store, ["a"], BatchVerb::hash_fields("h"), 0);
        assert_matches!(result.err(), Some(QueryError::InvalidBatchSize(0)));
    }
}
