use std::path::{Path, PathBuf};

use ms_types::{MsResult, ParameterSet, ParameterValue};
use serde::{Deserialize, Serialize};

/// Flat CSV table of sweep rows, one row per submitted parameter set.
///
/// Columns are the union of row keys in first-seen order, with any
/// `trailing` columns moved to the end in the order given. Missing values
/// are written as empty cells and dropped again on read.
#[derive(Debug, Clone)]
pub struct ResultsTable {
    path: PathBuf,
}

impl ResultsTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Table for a sweep, named from the first row's `task` and `repr_model`.
    pub fn for_sweep(results_dir: &Path, first: Option<&ParameterSet>) -> Self {
        let stem = Self::file_stem(first);
        Self::new(results_dir.join(format!("{stem}_results.csv")))
    }

    /// `<task>_<name>`: a list-valued `repr_model` is an architecture and is
    /// named `gnn`; a non-scalar task is `multi_task`.
    pub fn file_stem(first: Option<&ParameterSet>) -> String {
        let task = first
            .and_then(|p| p.get("task"))
            .and_then(ParameterValue::as_str)
            .map(str::to_lowercase)
            .unwrap_or_else(|| "multi_task".to_string());
        let name = match first.and_then(|p| p.get("repr_model")) {
            Some(ParameterValue::Text(name)) => name.to_lowercase(),
            Some(ParameterValue::List(_)) => "gnn".to_string(),
            Some(other) => other.to_cell().to_lowercase(),
            None => "model".to_string(),
        };
        format!("{task}_{name}")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(rows: &[ParameterSet], trailing: &[&str]) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !trailing.contains(&key) && !columns.iter().any(|c| c == key) {
                    columns.push(key.to_string());
                }
            }
        }
        columns.extend(trailing.iter().map(|c| c.to_string()));
        columns
    }

    pub fn write(&self, rows: &[ParameterSet], trailing: &[&str]) -> MsResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let columns = Self::columns(rows, trailing);
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(&columns)?;
        for row in rows {
            writer.write_record(columns.iter().map(|column| {
                row.get(column)
                    .map(ParameterValue::to_cell)
                    .unwrap_or_default()
            }))?;
        }
        writer.flush()?;
        tracing::info!("Wrote {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }

    pub fn read(&self) -> MsResult<Vec<ParameterSet>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: ParameterSet = headers
                .iter()
                .zip(record.iter())
                .filter_map(|(column, cell)| {
                    ParameterValue::from_cell(cell).map(|value| (column.to_string(), value))
                })
                .collect();
            rows.push(row);
        }
        Ok(rows)
    }
}

/// One epoch of one fold of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveRow {
    pub trial: usize,
    pub fold: usize,
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
}

/// Per-epoch loss curves of every fold, written next to the results table.
#[derive(Debug, Clone)]
pub struct CurveTable {
    path: PathBuf,
}

impl CurveTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_sweep(results_dir: &Path, first: Option<&ParameterSet>) -> Self {
        let stem = ResultsTable::file_stem(first);
        Self::new(results_dir.join(format!("{stem}_curves.csv")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, rows: &[CurveRow]) -> MsResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        tracing::debug!("Wrote {} curve points to {}", rows.len(), self.path.display());
        Ok(())
    }

    pub fn read(&self) -> MsResult<Vec<CurveRow>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let rows = reader.deserialize().collect::<Result<Vec<CurveRow>, _>>()?;
        Ok(rows)
    }
}
