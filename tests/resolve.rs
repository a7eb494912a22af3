use std::collections::BTreeSet;

use kira_biom_query::keyspace;
use kira_biom_query::memory::MemoryStore;
use kira_biom_query::resolve::{known_tags, resolve_ambiguities};

fn context_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .hset(keyspace::contexts(), "C", "Deblur-Illumina-16S-V4-150nt")
        .hset(keyspace::sample_tags("C"), "S1", r#"["run1","run2"]"#)
        .hset(keyspace::sample_tags("C"), "S2", r#"[""]"#)
        .hset(keyspace::sample_tags("C"), "S3", r#"["", "run1"]"#)
        .sadd(keyspace::context_tags("C"), "run2")
        .sadd(keyspace::context_tags("C"), "run1");
    store
}

#[test]
fn bare_sample_expands_to_tagged_variants() {
    let resolution = resolve_ambiguities(&context_store(), "C", ["S1"], 100).unwrap();

    let physical = resolution.ambiguities["S1"]
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>();
    assert_eq!(
        physical,
        BTreeSet::from(["run1_S1".to_string(), "run2_S1".to_string()])
    );
    assert_eq!(resolution.stable_ids.len(), 2);
    assert!(resolution.unobserved.is_empty());
}

#[test]
fn resolution_maps_back_to_requested_ids() {
    let requested = ["S1", "S2", "S3", "S9", "run1_S3"];
    let resolution = resolve_ambiguities(&context_store(), "C", requested, 2).unwrap();

    let recovered = resolution
        .ambiguities
        .values()
        .flatten()
        .map(|physical| resolution.logical_of(physical).to_string())
        .collect::<BTreeSet<_>>();
    let unobserved = resolution.unobserved.iter().cloned().collect::<BTreeSet<_>>();
    let expected = ["S1", "S2", "S3"]
        .into_iter()
        .map(str::to_string)
        .collect::<BTreeSet<_>>();

    assert_eq!(unobserved, BTreeSet::from(["S9".to_string()]));
    // run1_S3 is also reached through S3, which claimed it first.
    assert_eq!(recovered, expected);
}

#[test]
fn duplicate_requests_fetch_each_variant_once() {
    let resolution =
        resolve_ambiguities(&context_store(), "C", ["S3", "S3", "run1_S3", "S2"], 100).unwrap();

    let unique = resolution.stable_ids.iter().cloned().collect::<BTreeSet<_>>();
    assert_eq!(unique.len(), resolution.stable_ids.len());
    assert_eq!(
        unique,
        BTreeSet::from(["S2", "S3", "run1_S3"].map(str::to_string))
    );
    assert_eq!(resolution.ambiguities["run1_S3"], vec!["run1_S3"]);
}

#[test]
fn untagged_copy_stays_bare() {
    let resolution = resolve_ambiguities(&context_store(), "C", ["S2"], 100).unwrap();
    assert_eq!(resolution.ambiguities["S2"], vec!["S2"]);
    assert_eq!(resolution.logical_of("S2"), "S2");
}

#[test]
fn resolution_issues_one_request_per_batch() {
    let store = context_store();
    store.reset_round_trips();
    resolve_ambiguities(&store, "C", ["S1", "S2", "S3", "S4", "S5"], 2).unwrap();
    assert_eq!(store.round_trips(), 3);
}

#[test]
fn tags_are_listed_sorted() {
    assert_eq!(
        known_tags(&context_store(), "C").unwrap(),
        vec!["run1", "run2"]
    );
}
