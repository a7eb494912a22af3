use std::collections::BTreeSet;

use assert_matches::assert_matches;

use kira_biom_query::error::QueryError;
use kira_biom_query::keyspace;
use kira_biom_query::memory::MemoryStore;
use kira_biom_query::metadata::{MetadataQuery, sample_metadata};

fn metadata_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .set(keyspace::sample_categories("S1"), r#"["ph","temp"]"#)
        .set(keyspace::sample_categories("S2"), r#"["ph"]"#)
        .hset(keyspace::category_values("ph"), "S1", "7.1")
        .hset(keyspace::category_values("ph"), "S2", "6.4")
        .hset(keyspace::category_values("temp"), "S1", "21");
    store
}

fn with_context(mut store: MemoryStore) -> MemoryStore {
    store
        .hset(keyspace::contexts(), "C", "deblur")
        .hset(keyspace::sample_tags("C"), "S1", r#"["run1","run2"]"#)
        .hset(keyspace::sample_tags("C"), "S2", r#"["run1"]"#);
    store
}

#[test]
fn common_columns_are_the_intersection() {
    let result = sample_metadata(&metadata_store(), ["S1", "S2"], &MetadataQuery::default(), 100)
        .unwrap();
    assert_eq!(result.table.columns, vec!["ph"]);
    assert_eq!(result.table.row("S1").unwrap().value("ph"), Some("7.1"));
    assert_eq!(result.table.row("S2").unwrap().value("ph"), Some("6.4"));
}

#[test]
fn union_leaves_gaps_as_missing() {
    let query = MetadataQuery {
        common: false,
        ..MetadataQuery::default()
    };
    let result = sample_metadata(&metadata_store(), ["S1", "S2"], &query, 100).unwrap();
    assert_eq!(result.table.columns, vec!["ph", "temp"]);
    assert_eq!(result.table.row("S1").unwrap().value("temp"), Some("21"));
    assert_eq!(result.table.row("S2").unwrap().value("temp"), None);
}

#[test]
fn column_selection_bounds() {
    let store = metadata_store();
    let common = sample_metadata(&store, ["S1", "S2"], &MetadataQuery::default(), 100).unwrap();
    let union = sample_metadata(
        &store,
        ["S1", "S2"],
        &MetadataQuery {
            common: false,
            ..MetadataQuery::default()
        },
        100,
    )
    .unwrap();

    let intersection = BTreeSet::from(["ph".to_string()]);
    let all = BTreeSet::from(["ph".to_string(), "temp".to_string()]);
    let common_columns = common.table.columns.into_iter().collect::<BTreeSet<_>>();
    let union_columns = union.table.columns.into_iter().collect::<BTreeSet<_>>();
    assert!(common_columns.is_subset(&intersection));
    assert!(union_columns.is_superset(&intersection));
    assert!(union_columns.is_subset(&all));
}

#[test]
fn restriction_needs_only_one_sample_to_hold_the_column() {
    let query = MetadataQuery {
        restrict_to: Some(vec!["temp".to_string()]),
        ..MetadataQuery::default()
    };
    let result = sample_metadata(&metadata_store(), ["S1", "S2"], &query, 100).unwrap();
    assert_eq!(result.table.columns, vec!["temp"]);
    assert_eq!(result.table.row("S1").unwrap().value("temp"), Some("21"));
    assert_eq!(result.table.row("S2").unwrap().value("temp"), None);
}

#[test]
fn unknown_restriction_fails_before_value_reads() {
    let store = metadata_store();
    let query = MetadataQuery {
        restrict_to: Some(vec!["ph".to_string(), "depth".to_string(), "age".to_string()]),
        ..MetadataQuery::default()
    };
    store.reset_round_trips();
    let err = sample_metadata(&store, ["S1", "S2"], &query, 100).unwrap_err();

    assert_matches!(err, QueryError::MissingColumns(missing) if missing == vec!["age", "depth"]);
    // only the category set batch was issued
    assert_eq!(store.round_trips(), 1);
}

#[test]
fn disjoint_samples_have_no_common_columns() {
    let mut store = metadata_store();
    store.set(keyspace::sample_categories("S3"), r#"["depth"]"#);
    let err = sample_metadata(&store, ["S1", "S3"], &MetadataQuery::default(), 100).unwrap_err();
    assert_matches!(err, QueryError::EmptyIntersection { samples: 2 });
}

#[test]
fn context_expands_rows_and_uses_display_ids() {
    let store = with_context(metadata_store());
    let query = MetadataQuery {
        context: Some("C".to_string()),
        ..MetadataQuery::default()
    };
    let result = sample_metadata(&store, ["S1", "S2", "S7"], &query, 100).unwrap();

    let ids = result.table.sample_ids().collect::<BTreeSet<_>>();
    assert_eq!(ids, BTreeSet::from(["S1.run1", "S1.run2", "S2.run1"]));
    assert_eq!(result.table.row("S1.run2").unwrap().value("ph"), Some("7.1"));
    assert_eq!(result.table.row("S1.run1").unwrap().value("ph"), Some("7.1"));
    assert_eq!(result.ambiguities["S1"].len(), 2);
    assert_eq!(result.unobserved, vec!["S7"]);
}

#[test]
fn all_unobserved_is_an_empty_table_for_both_column_modes() {
    let store = with_context(metadata_store());
    for common in [true, false] {
        let query = MetadataQuery {
            common,
            context: Some("C".to_string()),
            ..MetadataQuery::default()
        };
        let result = sample_metadata(&store, ["S9"], &query, 100).unwrap();
        assert!(result.table.is_empty(), "common = {common}");
        assert!(result.table.columns.is_empty());
        assert_eq!(result.unobserved, vec!["S9"]);
    }
}

#[test]
fn shared_physical_sample_is_repeated_per_requester() {
    let mut store = with_context(metadata_store());
    store
        .hset(keyspace::sample_tags("C"), "S3", r#"["","run1"]"#)
        .set(keyspace::sample_categories("S3"), r#"["ph"]"#)
        .hset(keyspace::category_values("ph"), "S3", "5.9");
    let query = MetadataQuery {
        context: Some("C".to_string()),
        ..MetadataQuery::default()
    };
    let result = sample_metadata(&store, ["S3", "run1_S3"], &query, 100).unwrap();

    let mut ids = result.table.sample_ids().collect::<Vec<_>>();
    ids.sort();
    assert_eq!(ids, vec!["S3", "S3.run1", "S3.run1"]);
    assert!(
        result
            .table
            .rows
            .iter()
            .all(|row| row.value("ph") == Some("5.9"))
    );
}

#[test]
fn unknown_context_is_rejected() {
    let query = MetadataQuery {
        context: Some("missing".to_string()),
        ..MetadataQuery::default()
    };
    let err = sample_metadata(&metadata_store(), ["S1"], &query, 100).unwrap_err();
    assert_matches!(err, QueryError::UnknownContext(_));
}

#[test]
fn one_value_request_per_column_batch() {
    let mut store = MemoryStore::new();
    for i in 0..150 {
        let sample = format!("M{i}");
        store
            .set(keyspace::sample_categories(&sample), r#"["ph","temp"]"#)
            .hset(keyspace::category_values("ph"), sample.clone(), "7")
            .hset(keyspace::category_values("temp"), sample, "20");
    }
    let samples = (0..150).map(|i| format!("M{i}")).collect::<Vec<_>>();
    store.reset_round_trips();

    let result = sample_metadata(&store, &samples, &MetadataQuery::default(), 100).unwrap();
    assert_eq!(result.table.rows.len(), 150);
    // 2 category set batches + 2 columns x 2 value batches
    assert_eq!(store.round_trips(), 6);
}
