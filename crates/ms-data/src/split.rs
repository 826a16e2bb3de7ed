//! Scaffold-grouped train/test partitioning.

use std::collections::HashMap;

use ms_types::{ConfigError, ScaffoldKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::MoleculeDataset;
use crate::scaffold::ScaffoldFn;

/// Disjoint train/test positions into the split dataset. Both lists are sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub summary: SplitSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub samples: usize,
    pub groups: usize,
    pub unparseable: usize,
    pub target_train_size: usize,
    pub realized_test_fraction: f64,
}

/// Split a dataset so that no scaffold group spans both partitions.
///
/// Groups are taken largest first (ties keep first-encounter order) and each
/// goes whole into train while it fits under `floor(n * (1 - test_fraction))`,
/// otherwise whole into test. The realized fraction can therefore differ from
/// the requested one by up to one group's size.
pub fn scaffold_split(
    dataset: &MoleculeDataset,
    test_fraction: f64,
    scaffold_fn: &dyn ScaffoldFn,
) -> Result<Split, ConfigError> {
    validate_fraction(test_fraction)?;
    let keys: Vec<ScaffoldKey> = dataset
        .iter()
        .map(|record| scaffold_fn.scaffold(&record.smiles))
        .collect();
    let split = split_by_keys(&keys, test_fraction)?;
    debug!(
        "Scaffold split via {}: {} samples in {} groups ({} unparseable), train={} test={} (test fraction {:.3})",
        scaffold_fn.name(),
        split.summary.samples,
        split.summary.groups,
        split.summary.unparseable,
        split.train.len(),
        split.test.len(),
        split.summary.realized_test_fraction,
    );
    Ok(split)
}

/// Grouping and greedy assignment over precomputed keys.
pub fn split_by_keys(keys: &[ScaffoldKey], test_fraction: f64) -> Result<Split, ConfigError> {
    validate_fraction(test_fraction)?;
    let n = keys.len();

    let mut slot: HashMap<&ScaffoldKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        let g = *slot.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(i);
    }
    let group_count = groups.len();

    // Stable: equal sizes keep encounter order.
    groups.sort_by(|a, b| b.len().cmp(&a.len()));

    let target_train_size = (n as f64 * (1.0 - test_fraction)).floor() as usize;
    let mut train = Vec::with_capacity(target_train_size);
    let mut test = Vec::with_capacity(n.saturating_sub(target_train_size));
    for group in groups {
        if train.len() + group.len() <= target_train_size {
            train.extend(group);
        } else {
            test.extend(group);
        }
    }
    train.sort_unstable();
    test.sort_unstable();

    let realized_test_fraction = if n == 0 {
        0.0
    } else {
        test.len() as f64 / n as f64
    };

    Ok(Split {
        train,
        test,
        summary: SplitSummary {
            samples: n,
            groups: group_count,
            unparseable: keys.iter().filter(|k| k.is_unparseable()).count(),
            target_train_size,
            realized_test_fraction,
        },
    })
}

fn validate_fraction(test_fraction: f64) -> Result<(), ConfigError> {
    if test_fraction > 0.0 && test_fraction < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidFraction {
            value: test_fraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaffold::MurckoFramework;
    use ms_types::MoleculeRecord;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn framework(name: &str) -> ScaffoldKey {
        ScaffoldKey::Framework(name.to_string())
    }

    #[test]
    fn largest_groups_fill_train_first() {
        // Groups of sizes 5, 3, 1, 1, interleaved.
        let keys: Vec<ScaffoldKey> = ["a", "b", "a", "c", "a", "b", "a", "d", "b", "a"]
            .iter()
            .map(|k| framework(k))
            .collect();

        let split = split_by_keys(&keys, 0.2).unwrap();

        assert_eq!(split.train, vec![0, 1, 2, 4, 5, 6, 8, 9]);
        assert_eq!(split.test, vec![3, 7]);
        assert_eq!(split.summary.groups, 4);
        assert_eq!(split.summary.target_train_size, 8);
    }

    #[test]
    fn oversized_group_goes_to_test() {
        let keys: Vec<ScaffoldKey> = ["a", "a", "a", "b", "c"].iter().map(|k| framework(k)).collect();
        // target train = floor(5 * 0.5) = 2; group a (3) cannot fit.
        let split = split_by_keys(&keys, 0.5).unwrap();
        assert_eq!(split.train, vec![3, 4]);
        assert_eq!(split.test, vec![0, 1, 2]);
    }

    #[test]
    fn unparseable_records_form_one_group() {
        let keys = vec![
            ScaffoldKey::Unparseable,
            framework("a"),
            ScaffoldKey::Unparseable,
            ScaffoldKey::Unparseable,
        ];
        let split = split_by_keys(&keys, 0.2).unwrap();
        assert_eq!(split.summary.unparseable, 3);
        assert_eq!(split.summary.groups, 2);
        assert_eq!(split.train, vec![0, 2, 3]);
        assert_eq!(split.test, vec![1]);
    }

    #[test]
    fn empty_dataset_gives_empty_partitions() {
        let split = split_by_keys(&[], 0.2).unwrap();
        assert!(split.train.is_empty());
        assert!(split.test.is_empty());
        assert_eq!(split.summary.realized_test_fraction, 0.0);
    }

    #[test]
    fn fraction_must_be_open_unit_interval() {
        for bad in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(
                split_by_keys(&[framework("a")], bad),
                Err(ConfigError::InvalidFraction { .. })
            ));
        }
    }

    #[test]
    fn dataset_split_uses_structure() {
        let dataset = MoleculeDataset::from_records(vec![
            MoleculeRecord::new("c1ccccc1C", 1.0),
            MoleculeRecord::new("c1ccccc1O", 2.0),
            MoleculeRecord::new("c1ccccc1N", 3.0),
            MoleculeRecord::new("C1CCCCC1", 4.0),
            MoleculeRecord::new("CCO", 5.0),
        ]);
        let split = scaffold_split(&dataset, 0.4, &MurckoFramework::new()).unwrap();
        assert_eq!(split.train, vec![0, 1, 2]);
        assert_eq!(split.test, vec![3, 4]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn no_scaffold_spans_both_partitions(
            raw in prop::collection::vec(0u8..12, 0..200),
            fraction in 0.05f64..0.95,
        ) {
            let keys: Vec<ScaffoldKey> = raw
                .iter()
                .map(|k| if *k == 11 { ScaffoldKey::Unparseable } else { framework(&k.to_string()) })
                .collect();
            let split = split_by_keys(&keys, fraction).unwrap();

            prop_assert_eq!(split.train.len() + split.test.len(), keys.len());
            prop_assert!(split.train.len() <= split.summary.target_train_size);

            let train_keys: HashSet<&ScaffoldKey> = split.train.iter().map(|i| &keys[*i]).collect();
            let test_keys: HashSet<&ScaffoldKey> = split.test.iter().map(|i| &keys[*i]).collect();
            prop_assert!(train_keys.is_disjoint(&test_keys));
        }
    }
}
