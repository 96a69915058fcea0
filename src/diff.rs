use crate::types::{DiffResult, DigestMap};
use std::collections::BTreeMap;

/// Compares the current digest universe with the stored one.
pub struct DiffEngine;

impl DiffEngine {
    /// Classify every path in `current ∪ store`.
    ///
    /// The digest is the only staleness signal: a path whose content is
    /// unchanged stays `unchanged` even if it would be classified into a
    /// different tier today.
    pub fn diff(current: &BTreeMap<String, String>, store: &DigestMap) -> DiffResult {
        let mut result = DiffResult::default();

        for (path, digest) in current {
            match store.get(path) {
                None => {
                    result.added.insert(path.clone());
                }
                Some(entry) if entry.digest == *digest => {
                    result.unchanged.insert(path.clone());
                }
                Some(_) => {
                    result.changed.insert(path.clone());
                }
            }
        }

        result.removed = store
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DigestEntry, Tier};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn stored(pairs: &[(&str, &str)]) -> DigestMap {
        pairs
            .iter()
            .map(|(path, digest)| {
                (
                    path.to_string(),
                    DigestEntry {
                        digest: digest.to_string(),
                        tier: Tier::Batch,
                        description: Some(format!("desc of {}", path)),
                        last_analyzed_at: None,
                        heuristic: false,
                    },
                )
            })
            .collect()
    }

    fn current(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(p, d)| (p.to_string(), d.to_string())).collect()
    }

    #[test]
    fn test_classifies_each_kind() {
        let store = stored(&[("same.rs", "1"), ("edited.rs", "2"), ("gone.rs", "3")]);
        let now = current(&[("same.rs", "1"), ("edited.rs", "9"), ("new.rs", "4")]);

        let diff = DiffEngine::diff(&now, &store);

        assert_eq!(diff.added.iter().collect::<Vec<_>>(), vec!["new.rs"]);
        assert_eq!(diff.changed.iter().collect::<Vec<_>>(), vec!["edited.rs"]);
        assert_eq!(diff.removed.iter().collect::<Vec<_>>(), vec!["gone.rs"]);
        assert_eq!(diff.unchanged.iter().collect::<Vec<_>>(), vec!["same.rs"]);
    }

    #[test]
    fn test_diff_is_idempotent_against_unmodified_state() {
        let now = current(&[("a.rs", "1"), ("b/c.ts", "2")]);
        let store = stored(&[("a.rs", "1"), ("b/c.ts", "2")]);

        for _ in 0..2 {
            let diff = DiffEngine::diff(&now, &store);
            assert!(diff.added.is_empty());
            assert!(diff.changed.is_empty());
            assert!(diff.removed.is_empty());
            assert_eq!(diff.unchanged.len(), 2);
        }
    }

    #[test]
    fn test_tier_change_alone_is_unchanged() {
        let mut store = stored(&[("src/main.ts", "1")]);
        store.get_mut("src/main.ts").unwrap().tier = Tier::Skip;

        let diff = DiffEngine::diff(&current(&[("src/main.ts", "1")]), &store);
        assert!(diff.unchanged.contains("src/main.ts"));
    }

    #[test]
    fn test_empty_store_marks_everything_added() {
        let diff = DiffEngine::diff(&current(&[("a", "1"), ("b", "2")]), &DigestMap::new());
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
    }

    proptest! {
        #[test]
        fn prop_sets_partition_both_universes(
            now in prop::collection::btree_map("[a-e]{1,2}", "[0-2]", 0..12),
            before in prop::collection::btree_map("[a-e]{1,2}", "[0-2]", 0..12),
        ) {
            let store: DigestMap = before
                .iter()
                .map(|(path, digest)| (path.clone(), DigestEntry {
                    digest: digest.clone(),
                    tier: Tier::Batch,
                    description: None,
                    last_analyzed_at: None,
                    heuristic: false,
                }))
                .collect();

            let diff = DiffEngine::diff(&now, &store);

            let sets = [&diff.added, &diff.changed, &diff.removed, &diff.unchanged];
            let total: usize = sets.iter().map(|s| s.len()).sum();
            let union: BTreeSet<&String> = sets.iter().flat_map(|s| s.iter()).collect();
            prop_assert_eq!(total, union.len(), "sets overlap");

            let live: BTreeSet<&String> = diff.added.iter()
                .chain(diff.changed.iter())
                .chain(diff.unchanged.iter())
                .collect();
            prop_assert_eq!(live, now.keys().collect::<BTreeSet<_>>());

            let expected_removed: BTreeSet<String> = before.keys()
                .filter(|p| !now.contains_key(*p))
                .cloned()
                .collect();
            prop_assert_eq!(&diff.removed, &expected_removed);
        }
    }
}
