use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::batch::{BatchVerb, buffered};
use crate::domain::{SampleId, to_display_form};
use crate::error::QueryError;
use crate::keyspace;
use crate::resolve::{Resolution, resolve_ambiguities, validate_context};
use crate::store::KvStore;

/// Column holding the sample identifier when a table is rendered.
pub const SAMPLE_ID_COLUMN: &str = "#SampleID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataRow {
    pub sample_id: String,
    pub values: BTreeMap<String, Option<String>>,
}

impl MetadataRow {
    pub fn value(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|value| value.as_deref())
    }
}

/// Sample metadata, one row per sample and one column per category. A
/// sample id may appear on more than one row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataTable {
    pub columns: Vec<String>,
    pub rows: Vec<MetadataRow>,
}

impl MetadataTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn sample_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.sample_id.as_str())
    }

    pub fn row(&self, sample_id: &str) -> Option<&MetadataRow> {
        self.rows.iter().find(|row| row.sample_id == sample_id)
    }
}

#[derive(Debug, Clone)]
pub struct MetadataQuery {
    /// Keep only the categories shared by every sample; ignored when
    /// `restrict_to` is set.
    pub common: bool,
    /// Resolve ambiguous ids against this context and display tagged ids as
    /// `<id>.<tag>`.
    pub context: Option<String>,
    pub restrict_to: Option<Vec<String>>,
}

impl Default for MetadataQuery {
    fn default() -> Self {
        Self {
            common: true,
            context: None,
            restrict_to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleMetadata {
    pub table: MetadataTable,
    pub ambiguities: BTreeMap<String, Vec<String>>,
    pub unobserved: Vec<String>,
}

/// Category sets of the given samples. Samples without a stored set are
/// left out of the result.
pub fn fetch_category_sets<S: KvStore + ?Sized>(
    store: &S,
    samples: &[String],
    batch_size: usize,
) -> Result<BTreeMap<String, BTreeSet<String>>, QueryError> {
    let mut sets = BTreeMap::new();
    let batches = buffered(
        store,
        samples.iter().cloned(),
        BatchVerb::keys(keyspace::METADATA, keyspace::CATEGORIES_PREFIX),
        batch_size,
    )?;
    for batch in batches {
        for (sample, raw) in batch?.into_pairs() {
            let Some(raw) = raw else {
                continue;
            };
            let columns: BTreeSet<String> =
                serde_json::from_str(&raw).map_err(|err| QueryError::MalformedCategorySet {
                    sample: sample.clone(),
                    message: err.to_string(),
                })?;
            sets.insert(sample, columns);
        }
    }
    Ok(sets)
}

/// Values of one category for the given samples, in input order.
pub fn fetch_column_values<S: KvStore + ?Sized>(
    store: &S,
    category: &str,
    samples: &[String],
    batch_size: usize,
) -> Result<Vec<(String, Option<String>)>, QueryError> {
    buffered(
        store,
        samples.iter().cloned(),
        BatchVerb::hash_fields(keyspace::category_values(category)),
        batch_size,
    )?
    .collect_pairs()
}

/// Chooses the categories to fetch.
///
/// An explicit restriction must be a subset of the union of all sets and is
/// used as given. Otherwise `common` takes the intersection and its absence
/// the union. Without any set there is nothing to select.
pub fn select_columns<'a, I>(
    column_sets: I,
    common: bool,
    restrict_to: Option<&[String]>,
) -> Result<Vec<String>, QueryError>
where
    I: IntoIterator<Item = &'a BTreeSet<String>>,
{
    let mut sets = 0usize;
    let mut union = BTreeSet::new();
    let mut intersection: Option<BTreeSet<String>> = None;
    for set in column_sets {
        sets += 1;
        union.extend(set.iter().cloned());
        intersection = Some(match intersection {
            None => set.clone(),
            Some(current) => current.intersection(set).cloned().collect(),
        });
    }

    if let Some(restrict_to) = restrict_to {
        let missing = restrict_to
            .iter()
            .filter(|column| !union.contains(*column))
            .cloned()
            .collect::<BTreeSet<_>>();
        if !missing.is_empty() {
            return Err(QueryError::MissingColumns(missing.into_iter().collect()));
        }
        let mut seen = BTreeSet::new();
        return Ok(restrict_to
            .iter()
            .filter(|column| seen.insert(column.as_str()))
            .cloned()
            .collect());
    }

    if common {
        let Some(intersection) = intersection else {
            return Ok(Vec::new());
        };
        if intersection.is_empty() {
            return Err(QueryError::EmptyIntersection { samples: sets });
        }
        Ok(intersection.into_iter().collect())
    } else {
        Ok(union.into_iter().collect())
    }
}

/// Fetches metadata for `samples`.
///
/// Metadata is stored per untagged sample id. Each requested id contributes
/// one row per physical variant in its association, so an ambiguous id yields
/// repeated metadata under distinct row ids.
pub fn sample_metadata<S, I, T>(
    store: &S,
    samples: I,
    query: &MetadataQuery,
    batch_size: usize,
) -> Result<SampleMetadata, QueryError>
where
    S: KvStore + ?Sized,
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let resolution = match &query.context {
        Some(context) => {
            validate_context(store, context)?;
            resolve_ambiguities(store, context, samples, batch_size)?
        }
        None => Resolution::identity(samples)?,
    };

    let mut lookup_of = BTreeMap::new();
    let mut seen = BTreeSet::new();
    let mut lookups = Vec::new();
    for logical in resolution.ambiguities.keys() {
        let bare = logical.parse::<SampleId>()?.id().to_string();
        if seen.insert(bare.clone()) {
            lookups.push(bare.clone());
        }
        lookup_of.insert(logical.clone(), bare);
    }

    let category_sets = fetch_category_sets(store, &lookups, batch_size)?;
    let columns = select_columns(
        category_sets.values(),
        query.common,
        query.restrict_to.as_deref(),
    )?;
    debug!(
        samples = lookups.len(),
        with_metadata = category_sets.len(),
        columns = columns.len(),
        "selected metadata columns"
    );

    let described = category_sets.keys().cloned().collect::<Vec<_>>();
    let mut values: BTreeMap<String, BTreeMap<String, Option<String>>> = BTreeMap::new();
    for column in &columns {
        for (sample, value) in fetch_column_values(store, column, &described, batch_size)? {
            values
                .entry(sample)
                .or_default()
                .insert(column.clone(), value);
        }
    }

    let mut rows = Vec::new();
    for (logical, physical) in &resolution.ambiguities {
        let stored = lookup_of.get(logical).and_then(|bare| values.get(bare));
        for id in physical {
            let sample_id = if query.context.is_some() {
                to_display_form(id)
            } else {
                id.clone()
            };
            let row_values = columns
                .iter()
                .map(|column| {
                    let value = stored
                        .and_then(|stored| stored.get(column))
                        .cloned()
                        .flatten();
                    (column.clone(), value)
                })
                .collect();
            rows.push(MetadataRow {
                sample_id,
                values: row_values,
            });
        }
    }

    info!(
        rows = rows.len(),
        columns = columns.len(),
        "assembled sample metadata"
    );
    Ok(SampleMetadata {
        table: MetadataTable { columns, rows },
        ambiguities: resolution.ambiguities,
        unobserved: resolution.unobserved,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn common_takes_intersection() {
        let sets = [set(&["ph", "temp"]), set(&["ph"])];
        assert_eq!(select_columns(&sets, true, None).unwrap(), vec!["ph"]);
        assert_eq!(
            select_columns(&sets, false, None).unwrap(),
            vec!["ph", "temp"]
        );
    }

    #[test]
    fn restriction_checks_union() {
        let sets = [set(&["ph", "temp"]), set(&["ph"])];
        let restrict = vec!["temp".to_string(), "temp".to_string()];
        assert_eq!(
            select_columns(&sets, true, Some(&restrict)).unwrap(),
            vec!["temp"]
        );

        let restrict = vec!["depth".to_string(), "ph".to_string(), "age".to_string()];
        assert_matches!(
            select_columns(&sets, true, Some(&restrict)),
            Err(QueryError::MissingColumns(missing)) if missing == vec!["age", "depth"]
        );
    }

    #[test]
    fn no_sets_select_no_columns() {
        let sets: [BTreeSet<String>; 0] = [];
        assert!(select_columns(&sets, true, None).unwrap().is_empty());
        assert!(select_columns(&sets, false, None).unwrap().is_empty());
    }

    #[test]
    fn disjoint_sets_have_empty_intersection() {
        let sets = [set(&["ph"]), set(&["temp"])];
        assert_matches!(
            select_columns(&sets, true, None),
            Err(QueryError::EmptyIntersection { samples: 2 })
        );
    }
}
