use std::sync::Arc;
use std::time::Duration;

use ms_data::{CurveTable, DatasetSource, InMemorySource, MoleculeDataset, ResultsTable};
use ms_engine::Dispatcher;
use ms_optimizer::TrialStatus;
use ms_types::{DataError, DispatchSettings, MoleculeRecord, Partition, Task};
use tempfile::TempDir;

const SMILES: [&str; 10] = [
    "c1ccccc1C",
    "c1ccccc1CC",
    "c1ccccc1O",
    "C1CCCCC1N",
    "C1CCCCC1CO",
    "c1ccncc1C",
    "c1ccncc1Cl",
    "CCO",
    "CCCN",
    "CC(C)C(=O)O",
];

fn records(n: usize) -> Vec<MoleculeRecord> {
    (0..n)
        .map(|i| MoleculeRecord {
            smiles: SMILES[i % SMILES.len()].to_string(),
            target: 4.0 + (i % 9) as f64 * 0.25,
        })
        .collect()
}

fn source() -> Arc<InMemorySource> {
    Arc::new(InMemorySource::new().with_dataset(Task::Potency, "pIC50", Partition::Train, records(40)))
}

fn grid(text: &str) -> serde_yaml::Mapping {
    serde_yaml::from_str(text).unwrap()
}

const BASE: &str = "
task: potency
target_task: pIC50
repr_model: Fingerprint
proj_model: [8]
epochs: 3
weight_decay: 0.0
batch_size: 8
num_cv_folds: 3
scaffold_split_val_sz: 0.2
fp_bits: 32
";

fn settings(dir: &TempDir) -> DispatchSettings {
    DispatchSettings::default()
        .with_max_workers(2)
        .with_results_dir(dir.path())
}

#[test]
fn failing_jobs_still_produce_rows() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(settings(&dir), source()).with_accelerators(0);

    // 50 bins cannot be cut from 9 distinct targets, so half the grid fails.
    let params = grid(&format!("{BASE}lr: [0.01, 0.001]\nnum_cv_bins: [2, 50]\n"));
    let report = dispatcher.run_grid("mixed", &params).unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.status.trials_completed, 2);
    assert_eq!(report.status.trials_failed, 2);
    for outcome in &report.outcomes {
        let bins = outcome.trial.parameters.get("num_cv_bins").and_then(|v| v.as_i64());
        if bins == Some(50) {
            assert_eq!(outcome.status(), TrialStatus::Failed);
            assert!(outcome.trial.error.as_deref().unwrap_or("").contains("bins"));
        } else {
            assert_eq!(outcome.status(), TrialStatus::Completed);
            assert!(outcome.metrics.is_some());
        }
    }

    let best = report.status.best_trial.as_ref().unwrap();
    assert_eq!(
        best.parameters.get("num_cv_bins").and_then(|v| v.as_i64()),
        Some(2)
    );
}

#[test]
fn table_reloads_submitted_parameters() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(settings(&dir), source()).with_accelerators(0);

    let params = grid(&format!("{BASE}lr: [0.01, 0.005]\nnum_cv_bins: 2\n"));
    let sets = dispatcher.expand(&params).unwrap();
    let report = dispatcher.run("roundtrip", sets.clone()).unwrap();

    assert_eq!(
        report.results_path,
        dir.path().join("potency_fingerprint_results.csv")
    );
    let rows = ResultsTable::new(&report.results_path).read().unwrap();
    assert_eq!(rows.len(), sets.len());

    for row in &rows {
        let lr = row.get("lr").cloned();
        let submitted = sets
            .iter()
            .find(|s| s.get("lr").cloned() == lr)
            .expect("row matches a submitted set");
        for (key, value) in submitted.iter() {
            assert_eq!(row.get(key), Some(value), "column {key}");
        }
        assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("completed"));
        assert!(row.get("mean_val_loss").and_then(|v| v.as_f64()).is_some());
        assert!(row.get("run_id").is_some());
        assert_eq!(row.get("device").and_then(|v| v.as_str()), Some("cpu"));
    }
}

#[test]
fn curves_are_written_when_enabled() {
    let dir = TempDir::new().unwrap();
    let dispatcher =
        Dispatcher::new(settings(&dir).with_curves(true), source()).with_accelerators(0);

    let params = grid(&format!("{BASE}lr: 0.01\nnum_cv_bins: 2\n"));
    let report = dispatcher.run_grid("curves", &params).unwrap();

    let path = report.curves_path.clone().unwrap();
    let curves = CurveTable::new(path).read().unwrap();
    let folds: std::collections::BTreeSet<usize> = curves.iter().map(|c| c.fold).collect();
    assert_eq!(folds.len(), 3);
    assert!(curves.iter().all(|c| c.trial == 0 && c.epoch >= 1 && c.epoch <= 3));
}

#[test]
fn zero_timeout_cancels_every_job() {
    let dir = TempDir::new().unwrap();
    let dispatcher =
        Dispatcher::new(settings(&dir).with_job_timeout(0.0), source()).with_accelerators(0);

    let params = grid(&format!("{BASE}lr: [0.01, 0.001]\nnum_cv_bins: 2\n"));
    let report = dispatcher.run_grid("timeout", &params).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.status.trials_cancelled, 2);
    let rows = ResultsTable::new(&report.results_path).read().unwrap();
    assert!(rows
        .iter()
        .all(|r| r.get("status").and_then(|v| v.as_str()) == Some("cancelled")));
}

/// Panics for one target and hangs for another.
struct Misbehaving {
    inner: InMemorySource,
}

impl DatasetSource for Misbehaving {
    fn load(
        &self,
        task: Task,
        target_task: &str,
        partition: Partition,
    ) -> Result<MoleculeDataset, DataError> {
        match target_task {
            "boom" => panic!("dataset exploded"),
            "slow" => {
                std::thread::sleep(Duration::from_secs(2));
                self.inner.load(task, "pIC50", partition)
            }
            _ => self.inner.load(task, target_task, partition),
        }
    }

    fn name(&self) -> &str {
        "misbehaving"
    }
}

fn misbehaving() -> Arc<Misbehaving> {
    Arc::new(Misbehaving {
        inner: InMemorySource::new().with_dataset(Task::Potency, "pIC50", Partition::Train, records(40)),
    })
}

#[test]
fn panicking_job_is_isolated() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(settings(&dir), misbehaving()).with_accelerators(0);

    let params = grid(
        &(BASE
            .replace("target_task: pIC50", "target_task: [pIC50, boom]")
            .replace("epochs: 3", "epochs: 2")
            + "lr: 0.01\nnum_cv_bins: 2\n"),
    );
    let report = dispatcher.run_grid("panics", &params).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.status.trials_completed, 1);
    assert_eq!(report.status.trials_failed, 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.status() == TrialStatus::Failed)
        .unwrap();
    assert!(failed.trial.error.as_deref().unwrap_or("").contains("dataset exploded"));
}

#[test]
fn hung_job_is_cancelled_at_shutdown() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(&dir).with_job_timeout(0.05);
    settings.shutdown_grace_secs = 0.05;
    let dispatcher = Dispatcher::new(settings, misbehaving()).with_accelerators(0);

    let params = grid(&(BASE.replace("target_task: pIC50", "target_task: slow")
        + "lr: 0.01\nnum_cv_bins: 2\n"));
    let report = dispatcher.run_grid("hung", &params).unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status(), TrialStatus::Cancelled);
    assert_eq!(ResultsTable::new(&report.results_path).read().unwrap().len(), 1);
}
