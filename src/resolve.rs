use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::{BatchVerb, buffered};
use crate::domain::{SampleId, partition_samples};
use crate::error::QueryError;
use crate::keyspace;
use crate::store::KvStore;

/// Outcome of mapping requested (logical) sample ids onto the physically
/// stored variants of a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Physical ids to fetch, in discovery order, without duplicates.
    pub stable_ids: Vec<String>,
    /// Logical ids with no physical variant.
    pub unobserved: Vec<String>,
    /// Logical id to the physical ids satisfying it.
    pub ambiguities: BTreeMap<String, Vec<String>>,
    /// Physical id back to the logical id that first claimed it.
    pub reverse_map: BTreeMap<String, String>,
}

impl Resolution {
    /// Association of every id with itself, for lookups made without a context.
    pub fn identity<I, T>(samples: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut resolution = Self::default();
        for sample in partition_samples(samples)?.into_all() {
            let key = sample.storage_key();
            resolution.associate(key.clone(), vec![key]);
        }
        Ok(resolution)
    }

    /// Logical id for a physical id; ids fetched directly map to themselves.
    pub fn logical_of<'a>(&'a self, physical: &'a str) -> &'a str {
        self.reverse_map
            .get(physical)
            .map(String::as_str)
            .unwrap_or(physical)
    }

    pub fn is_ambiguous(&self, logical: &str) -> bool {
        self.ambiguities
            .get(logical)
            .is_some_and(|physical| physical.len() > 1)
    }

    fn associate(&mut self, logical: String, physical: Vec<String>) {
        if physical.is_empty() {
            self.unobserved.push(logical);
            return;
        }
        for id in &physical {
            if !self.reverse_map.contains_key(id) {
                self.reverse_map.insert(id.clone(), logical.clone());
                self.stable_ids.push(id.clone());
            }
        }
        self.ambiguities.insert(logical, physical);
    }
}

/// Fails with `UnknownContext` unless `context` is registered in the store.
pub fn validate_context<S: KvStore + ?Sized>(store: &S, context: &str) -> Result<(), QueryError> {
    let found = store.hmget(&keyspace::contexts(), &[context.to_string()])?;
    match found.into_iter().next().flatten() {
        Some(_) => Ok(()),
        None => Err(QueryError::UnknownContext(context.to_string())),
    }
}

/// Every registered context with its description.
pub fn contexts<S: KvStore + ?Sized>(store: &S) -> Result<BTreeMap<String, String>, QueryError> {
    store.hgetall(&keyspace::contexts())
}

pub fn known_tags<S: KvStore + ?Sized>(store: &S, context: &str) -> Result<Vec<String>, QueryError> {
    validate_context(store, context)?;
    Ok(store
        .smembers(&keyspace::context_tags(context))?
        .into_iter()
        .collect())
}

/// Resolves requested sample ids against the tag index of `context`.
///
/// Untagged ids expand to every stored variant. Tagged ids are taken
/// literally and resolve to themselves when that variant is stored. All bare
/// ids involved are looked up with one batched `HMGET` sequence.
pub fn resolve_ambiguities<S, I, T>(
    store: &S,
    context: &str,
    samples: I,
    batch_size: usize,
) -> Result<Resolution, QueryError>
where
    S: KvStore + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let partition = partition_samples(samples)?;

    let mut seen = BTreeSet::new();
    let lookups = partition
        .untagged
        .iter()
        .chain(partition.tagged.iter())
        .map(SampleId::id)
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut tags_by_id = HashMap::new();
    let batches = buffered(
        store,
        lookups,
        BatchVerb::hash_fields(keyspace::sample_tags(context)),
        batch_size,
    )?;
    for batch in batches {
        for (id, raw) in batch?.into_pairs() {
            let Some(raw) = raw else {
                continue;
            };
            let tags = parse_tags(context, &id, &raw)?;
            tags_by_id.insert(id, tags);
        }
    }

    let mut resolution = Resolution::default();
    for sample in &partition.untagged {
        let physical = tags_by_id
            .get(sample.id())
            .map(|tags| {
                tags.iter()
                    .map(|tag| variant_key(context, tag, sample.id()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        resolution.associate(sample.storage_key(), physical);
    }
    for sample in &partition.tagged {
        let stored = tags_by_id
            .get(sample.id())
            .is_some_and(|tags| tags.iter().any(|tag| Some(tag.as_str()) == sample.tag()));
        let physical = if stored {
            vec![sample.storage_key()]
        } else {
            Vec::new()
        };
        resolution.associate(sample.storage_key(), physical);
    }

    debug!(
        context,
        requested = partition.untagged.len() + partition.tagged.len(),
        physical = resolution.stable_ids.len(),
        "resolved sample ambiguities"
    );
    if !resolution.unobserved.is_empty() {
        warn!(
            context,
            unobserved = resolution.unobserved.len(),
            "samples not observed in context"
        );
    }
    Ok(resolution)
}

fn parse_tags(context: &str, id: &str, raw: &str) -> Result<Vec<String>, QueryError> {
    let tags: Vec<String> =
        serde_json::from_str(raw).map_err(|err| QueryError::MalformedTagList {
            context: context.to_string(),
            sample: id.to_string(),
            message: err.to_string(),
        })?;
    let mut seen = BTreeSet::new();
    Ok(tags
        .into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect())
}

fn variant_key(context: &str, tag: &str, id: &str) -> Result<String, QueryError> {
    SampleId::variant(tag, id)
        .map(|variant| variant.storage_key())
        .map_err(|_| QueryError::MalformedTagList {
            context: context.to_string(),
            sample: id.to_string(),
            message: format!("invalid tag {tag:?}"),
        })
}
