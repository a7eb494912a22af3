use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::batch::{BatchVerb, buffered};
use crate::domain::SampleId;
use crate::error::QueryError;
use crate::keyspace;
use crate::resolve::{Resolution, resolve_ambiguities, validate_context};
use crate::store::KvStore;

/// Separates the tokens of a sample payload.
pub const PAYLOAD_DELIMITER: char = '\t';

/// The nonzero entries of one physical sample in one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePayload {
    pub sample: String,
    pub pairs: Vec<(u64, f64)>,
}

impl SamplePayload {
    /// Parses `id<TAB>value<TAB>id<TAB>value...`. The empty string is a
    /// payload without entries.
    pub fn parse(context: &str, sample: &str, raw: &str) -> Result<Self, QueryError> {
        let malformed = |message: String| QueryError::MalformedPayload {
            context: context.to_string(),
            sample: sample.to_string(),
            message,
        };

        if raw.is_empty() {
            return Ok(Self {
                sample: sample.to_string(),
                pairs: Vec::new(),
            });
        }

        let tokens = raw.split(PAYLOAD_DELIMITER).collect::<Vec<_>>();
        if tokens.len() % 2 != 0 {
            return Err(malformed(format!("odd token count {}", tokens.len())));
        }

        let mut seen = HashSet::new();
        let mut pairs = Vec::with_capacity(tokens.len() / 2);
        for chunk in tokens.chunks_exact(2) {
            let id = chunk[0]
                .parse::<u64>()
                .map_err(|_| malformed(format!("invalid observation id {:?}", chunk[0])))?;
            let value = chunk[1]
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| malformed(format!("invalid value {:?}", chunk[1])))?;
            if !seen.insert(id) {
                return Err(malformed(format!("observation id {id} repeated")));
            }
            pairs.push((id, value));
        }

        Ok(Self {
            sample: sample.to_string(),
            pairs,
        })
    }

    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(id, value)| format!("{id}{PAYLOAD_DELIMITER}{value}"))
            .collect::<Vec<_>>()
            .join(&PAYLOAD_DELIMITER.to_string())
    }
}

/// Sparse observation by sample matrix, stored column by column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparseTable {
    observation_ids: Vec<String>,
    sample_ids: Vec<String>,
    logical_sample_ids: Vec<String>,
    columns: Vec<Vec<(usize, f64)>>,
}

impl SparseTable {
    pub fn shape(&self) -> (usize, usize) {
        (self.observation_ids.len(), self.sample_ids.len())
    }

    pub fn nnz(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn observation_ids(&self) -> &[String] {
        &self.observation_ids
    }

    /// Physical sample ids, one per column.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Logical sample ids, one per column; ambiguous samples repeat.
    pub fn logical_sample_ids(&self) -> &[String] {
        &self.logical_sample_ids
    }

    /// Entries of one column as `(row, value)`, ascending by row.
    pub fn column(&self, column: usize) -> &[(usize, f64)] {
        self.columns.get(column).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        let entries = self.column(column);
        entries
            .binary_search_by_key(&row, |(r, _)| *r)
            .map(|pos| entries[pos].1)
            .unwrap_or(0.0)
    }

    pub fn get_by_id(&self, observation: &str, sample: &str) -> Option<f64> {
        let row = self.observation_ids.iter().position(|id| id == observation)?;
        let column = self.sample_ids.iter().position(|id| id == sample)?;
        Some(self.get(row, column))
    }

    pub fn dense_row(&self, row: usize) -> Vec<f64> {
        (0..self.sample_ids.len())
            .map(|column| self.get(row, column))
            .collect()
    }
}

/// An assembled table plus the bookkeeping needed to interpret its columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assembly {
    pub table: SparseTable,
    /// Logical id to the physical columns it expanded to, limited to columns
    /// present in the table.
    pub ambiguities: BTreeMap<String, Vec<String>>,
    pub unobserved: Vec<String>,
    /// Physical ids left out because no payload is stored for them.
    pub absent: Vec<String>,
}

/// Loads the observation index of `context` inverted to integer id to label.
pub fn load_observation_index<S: KvStore + ?Sized>(
    store: &S,
    context: &str,
) -> Result<HashMap<u64, String>, QueryError> {
    let raw = store
        .get(&keyspace::observation_index(context))?
        .ok_or_else(|| QueryError::MissingObservationIndex(context.to_string()))?;
    let index: BTreeMap<String, u64> =
        serde_json::from_str(&raw).map_err(|err| QueryError::ObservationIndex {
            context: context.to_string(),
            message: err.to_string(),
        })?;

    let mut inverted = HashMap::with_capacity(index.len());
    for (label, id) in index {
        if let Some(previous) = inverted.insert(id, label.clone()) {
            return Err(QueryError::ObservationIndex {
                context: context.to_string(),
                message: format!("id {id} assigned to both {previous} and {label}"),
            });
        }
    }
    Ok(inverted)
}

/// Physical sample ids containing any (or, when `exact`, every) observation.
pub fn samples_from_observations<S, I, T>(
    store: &S,
    context: &str,
    observations: I,
    exact: bool,
) -> Result<Vec<String>, QueryError>
where
    S: KvStore + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    validate_context(store, context)?;

    let mut seen = HashSet::new();
    let mut found: Option<BTreeSet<String>> = None;
    for observation in observations {
        let observation = observation.as_ref();
        if !seen.insert(observation.to_string()) {
            continue;
        }
        let members = store.smembers(&keyspace::observation_samples(context, observation))?;
        found = Some(match found {
            None => members,
            Some(current) if exact => current.intersection(&members).cloned().collect(),
            Some(mut current) => {
                current.extend(members);
                current
            }
        });
    }
    Ok(found.unwrap_or_default().into_iter().collect())
}

pub fn data_from_samples<S, I, T>(
    store: &S,
    context: &str,
    samples: I,
    require_present: bool,
    batch_size: usize,
) -> Result<Assembly, QueryError>
where
    S: KvStore + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    validate_context(store, context)?;
    let resolution = resolve_ambiguities(store, context, samples, batch_size)?;
    assemble(store, context, &resolution, require_present, batch_size)
}

/// Assembles the samples holding the given observations. Every sample found
/// is a physical id, so it is attributed to its untagged id without further
/// tag discovery.
pub fn data_from_observations<S, I, T>(
    store: &S,
    context: &str,
    observations: I,
    exact: bool,
    batch_size: usize,
) -> Result<Assembly, QueryError>
where
    S: KvStore + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let samples = samples_from_observations(store, context, observations, exact)?;
    debug!(context, samples = samples.len(), exact, "samples from observations");

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for sample in samples {
        let parsed: SampleId = sample.parse()?;
        grouped
            .entry(parsed.id().to_string())
            .or_default()
            .push(parsed.storage_key());
    }
    let mut resolution = Resolution::default();
    for (logical, physical) in grouped {
        for id in &physical {
            resolution.reverse_map.insert(id.clone(), logical.clone());
            resolution.stable_ids.push(id.clone());
        }
        resolution.ambiguities.insert(logical, physical);
    }

    assemble(store, context, &resolution, false, batch_size)
}

/// Fetches the payload of every resolved physical sample and builds the table.
///
/// Rows are the distinct observation ids referenced by the fetched payloads,
/// ordered by ascending integer id. Columns follow `resolution.stable_ids`.
pub fn assemble<S: KvStore + ?Sized>(
    store: &S,
    context: &str,
    resolution: &Resolution,
    require_present: bool,
    batch_size: usize,
) -> Result<Assembly, QueryError> {
    let inverted = load_observation_index(store, context)?;

    let mut payloads = Vec::with_capacity(resolution.stable_ids.len());
    let mut absent = Vec::new();
    let batches = buffered(
        store,
        resolution.stable_ids.iter().cloned(),
        BatchVerb::keys(context, keyspace::DATA_PREFIX),
        batch_size,
    )?;
    for batch in batches {
        for (sample, raw) in batch?.into_pairs() {
            match raw {
                Some(raw) => payloads.push(SamplePayload::parse(context, &sample, &raw)?),
                None if require_present => absent.push(sample),
                None => payloads.push(SamplePayload {
                    sample,
                    pairs: Vec::new(),
                }),
            }
        }
    }

    let mut distinct = BTreeSet::new();
    for payload in &payloads {
        for (id, _) in &payload.pairs {
            if !inverted.contains_key(id) {
                return Err(QueryError::UnknownObservation {
                    context: context.to_string(),
                    sample: payload.sample.clone(),
                    observation: *id,
                });
            }
            distinct.insert(*id);
        }
    }

    let row_of = distinct
        .iter()
        .enumerate()
        .map(|(row, id)| (*id, row))
        .collect::<HashMap<_, _>>();
    let observation_ids = distinct
        .iter()
        .filter_map(|id| inverted.get(id).cloned())
        .collect::<Vec<_>>();

    let mut sample_ids = Vec::with_capacity(payloads.len());
    let mut logical_sample_ids = Vec::with_capacity(payloads.len());
    let mut columns = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let mut column = payload
            .pairs
            .iter()
            .filter_map(|(id, value)| row_of.get(id).map(|row| (*row, *value)))
            .collect::<Vec<_>>();
        column.sort_by_key(|(row, _)| *row);
        columns.push(column);
        logical_sample_ids.push(resolution.logical_of(&payload.sample).to_string());
        sample_ids.push(payload.sample);
    }

    let present = sample_ids.iter().collect::<HashSet<_>>();
    let ambiguities = resolution
        .ambiguities
        .iter()
        .filter_map(|(logical, physical)| {
            let kept = physical
                .iter()
                .filter(|id| present.contains(id))
                .cloned()
                .collect::<Vec<_>>();
            (!kept.is_empty()).then(|| (logical.clone(), kept))
        })
        .collect();

    let table = SparseTable {
        observation_ids,
        sample_ids,
        logical_sample_ids,
        columns,
    };
    info!(
        context,
        observations = table.shape().0,
        samples = table.shape().1,
        nnz = table.nnz(),
        "assembled sample table"
    );

    Ok(Assembly {
        table,
        ambiguities,
        unobserved: resolution.unobserved.clone(),
        absent,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_payload_pairs() {
        let payload = SamplePayload::parse("C", "S1", "0\t5\t1\t2.5").unwrap();
        assert_eq!(payload.pairs, vec![(0, 5.0), (1, 2.5)]);
        assert_eq!(payload.encode(), "0\t5\t1\t2.5");
    }

    #[test]
    fn empty_payload_has_no_pairs() {
        let payload = SamplePayload::parse("C", "S1", "").unwrap();
        assert!(payload.pairs.is_empty());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for raw in ["0\t5\t1", "x\t5", "0\tabc", "0\t1\t0\t2", "0\tNaN"] {
            assert_matches!(
                SamplePayload::parse("C", "S1", raw),
                Err(QueryError::MalformedPayload { .. }),
                "payload {raw:?}"
            );
        }
    }

    #[test]
    fn sparse_lookup() {
        let table = SparseTable {
            observation_ids: vec!["A".to_string(), "B".to_string()],
            sample_ids: vec!["S1".to_string()],
            logical_sample_ids: vec!["S1".to_string()],
            columns: vec![vec![(1, 4.0)]],
        };
        assert_eq!(table.get(0, 0), 0.0);
        assert_eq!(table.get(1, 0), 4.0);
        assert_eq!(table.get_by_id("B", "S1"), Some(4.0));
        assert_eq!(table.get_by_id("C", "S1"), None);
        assert_eq!(table.dense_row(1), vec![4.0]);
    }
}
