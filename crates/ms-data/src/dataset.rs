use std::collections::HashMap;
use std::sync::Arc;

use ms_types::{DataError, MoleculeRecord, Partition, Task};

/// An indexable view over a shared, immutable set of molecule records.
///
/// Subsetting never copies records: a subset holds the same backing storage
/// and a new index list, so folds and partitions are cheap to build.
#[derive(Debug, Clone)]
pub struct MoleculeDataset {
    records: Arc<Vec<MoleculeRecord>>,
    indices: Vec<usize>,
}

impl MoleculeDataset {
    pub fn from_records(records: Vec<MoleculeRecord>) -> Self {
        let indices = (0..records.len()).collect();
        Self {
            records: Arc::new(records),
            indices,
        }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MoleculeRecord> {
        self.indices.get(index).map(|i| &self.records[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MoleculeRecord> + '_ {
        self.indices.iter().map(move |i| &self.records[*i])
    }

    /// New view over the given positions of this view.
    pub fn subset(&self, positions: &[usize]) -> Result<Self, DataError> {
        let indices = positions
            .iter()
            .map(|p| {
                self.indices
                    .get(*p)
                    .copied()
                    .ok_or(DataError::IndexOutOfRange {
                        index: *p,
                        len: self.indices.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            records: Arc::clone(&self.records),
            indices,
        })
    }

    pub fn targets(&self) -> Vec<f64> {
        self.iter().map(|r| r.target).collect()
    }

    pub fn smiles(&self) -> Vec<&str> {
        self.iter().map(|r| r.smiles.as_str()).collect()
    }
}

/// Produces datasets for a task. Implementations must be usable from many
/// worker threads at once.
pub trait DatasetSource: Send + Sync {
    fn load(
        &self,
        task: Task,
        target_task: &str,
        partition: Partition,
    ) -> Result<MoleculeDataset, DataError>;

    fn name(&self) -> &str;
}

/// Dataset source backed by datasets registered up front.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    datasets: HashMap<(Task, String, Partition), MoleculeDataset>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(
        mut self,
        task: Task,
        target_task: impl Into<String>,
        partition: Partition,
        records: Vec<MoleculeRecord>,
    ) -> Self {
        self.datasets.insert(
            (task, target_task.into(), partition),
            MoleculeDataset::from_records(records),
        );
        self
    }
}

impl DatasetSource for InMemorySource {
    fn load(
        &self,
        task: Task,
        target_task: &str,
        partition: Partition,
    ) -> Result<MoleculeDataset, DataError> {
        self.datasets
            .get(&(task, target_task.to_string(), partition))
            .cloned()
            .ok_or_else(|| DataError::PartitionUnavailable {
                task: format!("{task}/{target_task}"),
                partition: partition.to_string(),
            })
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<MoleculeRecord> {
        vec![
            MoleculeRecord::new("CCO", 1.0),
            MoleculeRecord::new("c1ccccc1", 2.0),
            MoleculeRecord::new("CCN", 3.0),
            MoleculeRecord::new("C1CCCCC1", 4.0),
        ]
    }

    #[test]
    fn subset_of_subset_resolves_to_backing_records() {
        let dataset = MoleculeDataset::from_records(records());
        let outer = dataset.subset(&[3, 1, 2]).unwrap();
        let inner = outer.subset(&[2, 0]).unwrap();

        assert_eq!(inner.len(), 2);
        assert_eq!(inner.targets(), vec![3.0, 4.0]);
        assert_eq!(inner.smiles(), vec!["CCN", "C1CCCCC1"]);
    }

    #[test]
    fn subset_rejects_out_of_range_positions() {
        let dataset = MoleculeDataset::from_records(records());
        let err = dataset.subset(&[0, 4]).unwrap_err();
        assert!(matches!(err, DataError::IndexOutOfRange { index: 4, len: 4 }));
    }

    #[test]
    fn in_memory_source_lookup() {
        let source = InMemorySource::new().with_dataset(
            Task::Potency,
            "pIC50",
            Partition::Train,
            records(),
        );

        let loaded = source.load(Task::Potency, "pIC50", Partition::Train).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(matches!(
            source.load(Task::Potency, "pIC50", Partition::Test),
            Err(DataError::PartitionUnavailable { .. })
        ));
    }
}
