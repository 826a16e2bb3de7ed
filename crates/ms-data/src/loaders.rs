use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use ms_types::{DataError, MoleculeRecord, Partition, Task};

use crate::dataset::{DatasetSource, MoleculeDataset};

/// Dataset source reading per-task CSV files under a data root.
///
/// Layout:
/// - `<root>/polaris/<task>/<target_task>_train.csv` and `..._test.csv`
/// - `<root>/molecule_net/<target_task>.csv` (train only)
#[derive(Debug, Clone)]
pub struct CsvDatasetSource {
    root: PathBuf,
}

impl CsvDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing a task partition, or `None` when the task does not publish it.
    pub fn path_for(&self, task: Task, target_task: &str, partition: Partition) -> Option<PathBuf> {
        match task {
            Task::Admet | Task::Potency => Some(
                self.root
                    .join("polaris")
                    .join(task.as_str())
                    .join(format!("{target_task}_{partition}.csv")),
            ),
            Task::MoleculeNet => match partition {
                Partition::Train => Some(
                    self.root
                        .join("molecule_net")
                        .join(format!("{target_task}.csv")),
                ),
                Partition::Test => None,
            },
        }
    }

    /// Load records from a CSV file, locating columns by header.
    ///
    /// Rows with a missing descriptor or an unparsable target are skipped with a
    /// warning. With `log_transform`, targets are mapped to log10 and
    /// non-positive values are skipped.
    pub fn load_csv_file<P: AsRef<Path>>(
        &self,
        file_path: P,
        target_task: &str,
        log_transform: bool,
    ) -> Result<Vec<MoleculeRecord>, DataError> {
        let path = file_path.as_ref();
        tracing::info!("Loading molecules from: {}", path.display());

        if !path.exists() {
            return Err(DataError::SourceNotFound {
                path: path.display().to_string(),
            });
        }

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV headers: {}", e),
            })?
            .clone();
        tracing::debug!("CSV headers: {:?}", headers);

        let (smiles_idx, target_idx) = detect_csv_columns(&headers, target_task)?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line_num, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV record at line {}: {}", line_num + 2, e),
            })?;

            match parse_csv_record(&record, smiles_idx, target_idx, log_transform) {
                Ok(molecule) => records.push(molecule),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!("Skipping invalid record at line {}: {}", line_num + 2, e);
                }
            }
        }

        tracing::info!(
            "Loaded {} molecules from {} ({} skipped)",
            records.len(),
            path.display(),
            skipped
        );
        Ok(records)
    }
}

impl DatasetSource for CsvDatasetSource {
    fn load(
        &self,
        task: Task,
        target_task: &str,
        partition: Partition,
    ) -> Result<MoleculeDataset, DataError> {
        let path = self
            .path_for(task, target_task, partition)
            .ok_or_else(|| DataError::PartitionUnavailable {
                task: format!("{task}/{target_task}"),
                partition: partition.to_string(),
            })?;
        let records = self.load_csv_file(&path, target_task, task.log_transform())?;
        Ok(MoleculeDataset::from_records(records))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn parse_csv_record(
    record: &csv::StringRecord,
    smiles_idx: usize,
    target_idx: usize,
    log_transform: bool,
) -> Result<MoleculeRecord, DataError> {
    let needed = smiles_idx.max(target_idx) + 1;
    if record.len() < needed {
        return Err(DataError::ParseError {
            message: format!("CSV record has {} columns, expected at least {}", record.len(), needed),
        });
    }

    let smiles = record.get(smiles_idx).unwrap_or("");
    if smiles.is_empty() {
        return Err(DataError::ParseError {
            message: "Empty structural descriptor".to_string(),
        });
    }

    let raw = record.get(target_idx).unwrap_or("");
    let mut target: f64 = raw.parse().map_err(|e| DataError::ParseError {
        message: format!("Could not parse target value '{}': {}", raw, e),
    })?;
    if !target.is_finite() {
        return Err(DataError::ParseError {
            message: format!("Target value '{}' is not finite", raw),
        });
    }

    if log_transform {
        if target <= 0.0 {
            return Err(DataError::ParseError {
                message: format!("Cannot log-transform non-positive target {}", target),
            });
        }
        target = target.log10();
    }

    Ok(MoleculeRecord::new(smiles, target))
}

/// Detect descriptor and target column positions from headers.
///
/// A column named after the target task wins over the generic target names.
fn detect_csv_columns(
    headers: &csv::StringRecord,
    target_task: &str,
) -> Result<(usize, usize), DataError> {
    let mut smiles_idx = None;
    let mut exact_target_idx = None;
    let mut generic_target_idx = None;
    let target_lower = target_task.to_lowercase();

    for (i, header) in headers.iter().enumerate() {
        let header_lower = header.to_lowercase();
        if header_lower == target_lower {
            exact_target_idx = Some(i);
            continue;
        }
        match header_lower.as_str() {
            "smiles" | "canonical_smiles" | "mol" => {
                smiles_idx.get_or_insert(i);
            }
            "y" | "target" | "label" => {
                generic_target_idx.get_or_insert(i);
            }
            _ => {}
        }
    }

    let smiles_idx = smiles_idx.ok_or_else(|| DataError::InvalidFormat {
        message: "Could not find a descriptor column (smiles, canonical_smiles, mol) in CSV headers"
            .to_string(),
    })?;
    let target_idx = exact_target_idx
        .or(generic_target_idx)
        .ok_or_else(|| DataError::InvalidFormat {
            message: format!(
                "Could not find a target column ({}, y, target, label) in CSV headers",
                target_task
            ),
        })?;

    Ok((smiles_idx, target_idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_polaris_loading() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "polaris/potency/pIC50_train.csv",
            "CXSMILES_ID,smiles,pIC50\n\
             a,c1ccccc1O,6.5\n\
             b,CCN,\n\
             c,CC(=O)O,5.25\n",
        );

        let source = CsvDatasetSource::new(temp_dir.path());
        let dataset = source.load(Task::Potency, "pIC50", Partition::Train).unwrap();

        // Row b has no target and is skipped.
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.smiles(), vec!["c1ccccc1O", "CC(=O)O"]);
        assert_eq!(dataset.targets(), vec![6.5, 5.25]);
    }

    #[test]
    fn test_admet_log_transform() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "polaris/admet/MLM_test.csv",
            "SMILES,y\nCCO,100\nCCN,-3\nCCC,0.1\n",
        );

        let source = CsvDatasetSource::new(temp_dir.path());
        let dataset = source.load(Task::Admet, "MLM", Partition::Test).unwrap();

        assert_eq!(dataset.len(), 2);
        let targets = dataset.targets();
        assert!((targets[0] - 2.0).abs() < 1e-12);
        assert!((targets[1] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_molecule_net_has_no_test_partition() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "molecule_net/esol.csv", "mol,target\nCCO,-0.77\n");

        let source = CsvDatasetSource::new(temp_dir.path());
        assert_eq!(
            source
                .load(Task::MoleculeNet, "esol", Partition::Train)
                .unwrap()
                .len(),
            1
        );
        assert!(matches!(
            source.load(Task::MoleculeNet, "esol", Partition::Test),
            Err(DataError::PartitionUnavailable { .. })
        ));
    }

    #[test]
    fn test_missing_file_and_columns() {
        let temp_dir = TempDir::new().unwrap();
        let source = CsvDatasetSource::new(temp_dir.path());
        assert!(matches!(
            source.load(Task::Potency, "pIC50", Partition::Train),
            Err(DataError::SourceNotFound { .. })
        ));

        write(temp_dir.path(), "polaris/potency/pIC50_train.csv", "id,value\n1,2\n");
        assert!(matches!(
            source.load(Task::Potency, "pIC50", Partition::Train),
            Err(DataError::InvalidFormat { .. })
        ));
    }
}
