use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::{TAG_SEPARATOR, partition_samples};
use crate::error::QueryError;
use crate::keyspace;
use crate::metadata::{
    MetadataRow, MetadataTable, fetch_category_sets, fetch_column_values,
};
use crate::store::KvStore;

/// Row predicate applied to an assembled metadata table.
pub trait RecordFilter {
    fn matches(&self, row: &MetadataRow) -> bool;

    fn matching_ids(&self, table: &MetadataTable) -> BTreeSet<String> {
        table
            .rows
            .iter()
            .filter(|row| self.matches(row))
            .map(|row| row.sample_id.clone())
            .collect()
    }
}

impl<F> RecordFilter for F
where
    F: Fn(&MetadataRow) -> bool,
{
    fn matches(&self, row: &MetadataRow) -> bool {
        self(row)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllRecords;

impl RecordFilter for AllRecords {
    fn matches(&self, _row: &MetadataRow) -> bool {
        true
    }
}

/// Single column test, parsed from `COLUMN=VALUE` or `COLUMN~PATTERN`.
#[derive(Debug, Clone)]
pub enum ColumnFilter {
    Equals { column: String, value: String },
    Matches { column: String, pattern: Regex },
}

impl ColumnFilter {
    pub fn column(&self) -> &str {
        match self {
            ColumnFilter::Equals { column, .. } => column,
            ColumnFilter::Matches { column, .. } => column,
        }
    }
}

impl FromStr for ColumnFilter {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let split = value
            .find(['=', '~'])
            .map(|pos| (&value[..pos], &value[pos..pos + 1], &value[pos + 1..]));
        match split {
            Some((column, "=", expected)) if !column.trim().is_empty() => Ok(Self::Equals {
                column: column.trim().to_string(),
                value: expected.to_string(),
            }),
            Some((column, "~", pattern)) if !column.trim().is_empty() => {
                let pattern =
                    Regex::new(pattern).map_err(|_| QueryError::InvalidFilter(value.to_string()))?;
                Ok(Self::Matches {
                    column: column.trim().to_string(),
                    pattern,
                })
            }
            _ => Err(QueryError::InvalidFilter(value.to_string())),
        }
    }
}

impl RecordFilter for ColumnFilter {
    fn matches(&self, row: &MetadataRow) -> bool {
        match self {
            ColumnFilter::Equals { column, value } => row.value(column) == Some(value.as_str()),
            ColumnFilter::Matches { column, pattern } => row
                .value(column)
                .is_some_and(|actual| pattern.is_match(actual)),
        }
    }
}

/// Number of samples holding a value, per represented category.
pub fn sample_counts_per_category<S: KvStore + ?Sized>(
    store: &S,
) -> Result<BTreeMap<String, u64>, QueryError> {
    let categories = store.smembers(&keyspace::categories_represented())?;
    let mut counts = BTreeMap::new();
    for category in categories {
        let count = store.hlen(&keyspace::category_values(&category))?;
        counts.insert(category, count);
    }
    Ok(counts)
}

/// Samples and their value for `category`, for every sample when `samples`
/// is `None`. Requested ids are looked up by their untagged form.
pub fn category_sample_values<S: KvStore + ?Sized>(
    store: &S,
    category: &str,
    samples: Option<&[String]>,
    batch_size: usize,
) -> Result<Vec<(String, Option<String>)>, QueryError> {
    match samples {
        None => Ok(store
            .hgetall(&keyspace::category_values(category))?
            .into_iter()
            .map(|(sample, value)| (sample, Some(value)))
            .collect()),
        Some(samples) => {
            // values are stored under the untagged id
            let mut seen = BTreeSet::new();
            let ids = partition_samples(samples)?
                .into_all()
                .into_iter()
                .map(|id| id.id().to_string())
                .filter(|id| seen.insert(id.clone()))
                .collect::<Vec<_>>();
            fetch_column_values(store, category, &ids, batch_size)
        }
    }
}

/// Metadata of every stored sample holding at least one of the
/// `restrict_to` categories.
///
/// Without a `tag` only untagged sample ids are considered, with one only ids
/// stored under that tag.
pub fn search_table<S: KvStore + ?Sized>(
    store: &S,
    tag: Option<&str>,
    restrict_to: Option<&[String]>,
    batch_size: usize,
) -> Result<MetadataTable, QueryError> {
    let restrict_to = match restrict_to {
        Some(columns) if !columns.is_empty() => columns,
        _ => return Err(QueryError::MissingRestriction),
    };

    let represented = store.smembers(&keyspace::categories_represented())?;
    let missing = restrict_to
        .iter()
        .filter(|column| !represented.contains(*column))
        .cloned()
        .collect::<BTreeSet<_>>();
    if !missing.is_empty() {
        return Err(QueryError::MissingColumns(missing.into_iter().collect()));
    }
    let mut seen = BTreeSet::new();
    let columns = restrict_to
        .iter()
        .filter(|column| seen.insert(column.as_str()))
        .cloned()
        .collect::<Vec<_>>();

    let prefix = tag.map(|tag| format!("{tag}{TAG_SEPARATOR}"));
    let samples = store
        .smembers(&keyspace::samples_represented())?
        .into_iter()
        .filter(|sample| match &prefix {
            None => !sample.contains(TAG_SEPARATOR),
            Some(prefix) => sample.starts_with(prefix.as_str()),
        })
        .collect::<Vec<_>>();

    let wanted = columns.iter().cloned().collect::<BTreeSet<_>>();
    let candidates = fetch_category_sets(store, &samples, batch_size)?
        .into_iter()
        .filter(|(_, set)| !set.is_disjoint(&wanted))
        .map(|(sample, _)| sample)
        .collect::<Vec<_>>();
    debug!(
        scanned = samples.len(),
        candidates = candidates.len(),
        "metadata search candidates"
    );
    if candidates.is_empty() {
        return Ok(MetadataTable::default());
    }

    let mut values: BTreeMap<String, BTreeMap<String, Option<String>>> = candidates
        .iter()
        .map(|sample| (sample.clone(), BTreeMap::new()))
        .collect();
    for column in &columns {
        for (sample, value) in fetch_column_values(store, column, &candidates, batch_size)? {
            if let Some(row) = values.get_mut(&sample) {
                row.insert(column.clone(), value);
            }
        }
    }

    let rows = values
        .into_iter()
        .map(|(sample_id, values)| MetadataRow { sample_id, values })
        .collect();
    Ok(MetadataTable { columns, rows })
}

/// Sample ids whose metadata satisfies `filter`.
pub fn metadata_search<S: KvStore + ?Sized>(
    store: &S,
    filter: &dyn RecordFilter,
    tag: Option<&str>,
    restrict_to: Option<&[String]>,
    batch_size: usize,
) -> Result<BTreeSet<String>, QueryError> {
    let table = search_table(store, tag, restrict_to, batch_size)?;
    if table.is_empty() {
        return Ok(BTreeSet::new());
    }
    let found = filter.matching_ids(&table);
    info!(rows = table.rows.len(), matched = found.len(), "metadata search");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn row(sample: &str, column: &str, value: Option<&str>) -> MetadataRow {
        MetadataRow {
            sample_id: sample.to_string(),
            values: [(column.to_string(), value.map(str::to_string))]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn parse_column_filters() {
        let equals: ColumnFilter = "env_biome=soil".parse().unwrap();
        assert_matches!(&equals, ColumnFilter::Equals { column, value } if column == "env_biome" && value == "soil");

        let matches: ColumnFilter = "ph~^7\\.".parse().unwrap();
        assert_eq!(matches.column(), "ph");

        assert_matches!("ph".parse::<ColumnFilter>(), Err(QueryError::InvalidFilter(_)));
        assert_matches!("=7".parse::<ColumnFilter>(), Err(QueryError::InvalidFilter(_)));
        assert_matches!("ph~(".parse::<ColumnFilter>(), Err(QueryError::InvalidFilter(_)));
    }

    #[test]
    fn column_filters_skip_missing_values() {
        let filter: ColumnFilter = "ph~^7".parse().unwrap();
        assert!(filter.matches(&row("S1", "ph", Some("7.2"))));
        assert!(!filter.matches(&row("S2", "ph", Some("6.8"))));
        assert!(!filter.matches(&row("S3", "ph", None)));
    }

    #[test]
    fn closures_are_filters() {
        let table = MetadataTable {
            columns: vec!["ph".to_string()],
            rows: vec![row("S1", "ph", Some("7")), row("S2", "ph", None)],
        };
        let has_value = |row: &MetadataRow| row.value("ph").is_some();
        assert_eq!(
            has_value.matching_ids(&table),
            BTreeSet::from(["S1".to_string()])
        );
        assert_eq!(AllRecords.matching_ids(&table).len(), 2);
    }
}
