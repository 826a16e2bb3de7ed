//! Parallel sweep dispatch.
//!
//! Every expanded parameter set becomes one job on a rayon pool. Jobs report
//! back over a crossbeam channel, exactly one message each, and the
//! dispatcher writes one table row per submitted set whatever happened to
//! the job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError};
use ms_data::{CurveRow, CurveTable, DatasetSource, MurckoFramework, ResultsTable, ScaffoldFn};
use ms_optimizer::{
    accelerator_count, DeviceAllocator, GridSearch, SearchSpace, SweepStatus, Trial, TrialOutcome,
    WorkerAllocation, METRIC_COLUMNS,
};
use ms_types::{ConfigError, DispatchSettings, JobSettings, MsError, MsResult, ParameterSet};
use tracing::{debug, error, info, info_span, warn};

use crate::job::TrainingJob;
use crate::training::{Deadline, PerformanceRecord};

/// What a sweep produced.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub status: SweepStatus,
    /// Outcomes in arrival order, one per submitted set.
    pub outcomes: Vec<TrialOutcome>,
    pub results_path: PathBuf,
    pub curves_path: Option<PathBuf>,
}

impl SweepReport {
    pub fn rows(&self) -> Vec<ParameterSet> {
        self.outcomes.iter().map(TrialOutcome::to_row).collect()
    }
}

/// The single message a worker sends when its job ends.
struct JobMessage {
    outcome: TrialOutcome,
    curves: Vec<PerformanceRecord>,
}

/// Shared, read-only state every job sees.
struct JobContext {
    source: Arc<dyn DatasetSource>,
    scaffold_fn: Arc<dyn ScaffoldFn>,
    allocator: DeviceAllocator,
    timeout: Option<Duration>,
    seed: u64,
}

pub struct Dispatcher {
    settings: DispatchSettings,
    source: Arc<dyn DatasetSource>,
    scaffold_fn: Arc<dyn ScaffoldFn>,
    accelerators: usize,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings, source: Arc<dyn DatasetSource>) -> Self {
        let accelerators = accelerator_count(settings.accelerators, |key| std::env::var(key).ok());
        Self {
            settings,
            source,
            scaffold_fn: Arc::new(MurckoFramework::new()),
            accelerators,
        }
    }

    pub fn with_scaffold_fn(mut self, scaffold_fn: Arc<dyn ScaffoldFn>) -> Self {
        self.scaffold_fn = scaffold_fn;
        self
    }

    pub fn with_accelerators(mut self, count: usize) -> Self {
        self.accelerators = count;
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Expand the `params` grid using the configured pass-through and coupled keys.
    pub fn expand(&self, grid: &serde_yaml::Mapping) -> Result<Vec<ParameterSet>, ConfigError> {
        let mut search = GridSearch::new(SearchSpace::from_yaml(grid)?);
        if let Some(key) = &self.settings.pass_through {
            search = search.with_pass_through(key.as_str())?;
        }
        if let Some((first, second)) = &self.settings.coupled {
            search = search.with_coupled(first.as_str(), second.as_str())?;
        }
        match search.grid_size() {
            Some(size) => info!("Grid expands to {} parameter sets", size),
            None => warn!("Grid size overflows; expanding anyway"),
        }
        Ok(search.expand())
    }

    /// Validate every set up front. Any invalid set aborts the sweep.
    pub fn validate(&self, sets: &[ParameterSet]) -> Result<Vec<JobSettings>, ConfigError> {
        sets.iter()
            .enumerate()
            .map(|(n, params)| {
                JobSettings::from_params(params).map_err(|e| {
                    error!("Parameter set {} is invalid: {}", n, e);
                    e
                })
            })
            .collect()
    }

    pub fn run_grid(&self, name: &str, grid: &serde_yaml::Mapping) -> MsResult<SweepReport> {
        let sets = self.expand(grid)?;
        self.run(name, sets)
    }

    /// Run one job per set and write the results table.
    pub fn run(&self, name: &str, sets: Vec<ParameterSet>) -> MsResult<SweepReport> {
        self.settings.validate()?;
        let jobs = self.validate(&sets)?;
        let total = sets.len();

        let mut status = SweepStatus::new(name, total);
        let plan = WorkerAllocation::plan(&self.settings, total, self.accelerators);
        info!(
            "Starting sweep {} ({}): {} jobs on {} workers, devices {:?}",
            name, status.id, total, plan.num_workers, plan.strategy
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plan.num_workers)
            .thread_name(|i| format!("molsweep-worker-{i}"))
            .build()
            .map_err(|e| MsError::Internal(format!("failed to start worker pool: {e}")))?;

        let context = Arc::new(JobContext {
            source: Arc::clone(&self.source),
            scaffold_fn: Arc::clone(&self.scaffold_fn),
            allocator: DeviceAllocator::new(&plan),
            timeout: self.settings.job_timeout(),
            seed: self.settings.seed,
        });

        status.mark_running();
        let (tx, rx) = unbounded::<JobMessage>();
        for (n, (params, job)) in sets.iter().cloned().zip(jobs).enumerate() {
            let trial = Trial::new(status.id, n, params);
            let tx = tx.clone();
            let context = Arc::clone(&context);
            pool.spawn(move || {
                let message = execute(trial, &job, &context);
                // The receiver only goes away once the sweep gave up on this job.
                let _ = tx.send(message);
            });
        }
        drop(tx);

        let idle_limit = self
            .settings
            .job_timeout()
            .map(|timeout| timeout + self.settings.shutdown_grace());

        let mut messages: Vec<JobMessage> = Vec::with_capacity(total);
        while messages.len() < total {
            let received = match idle_limit {
                Some(limit) => rx.recv_timeout(limit),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(message) => {
                    let outcome = &message.outcome;
                    status.record(outcome);
                    debug!(
                        "Trial {} finished: {} ({}/{})",
                        outcome.trial_number(),
                        outcome.status().as_str(),
                        status.trials_finished(),
                        total
                    );
                    messages.push(message);
                }
                Err(RecvTimeoutError::Timeout) => {
                    error!(
                        "No job finished within {:?}; giving up on {} unfinished jobs",
                        idle_limit.unwrap_or_default(),
                        total - messages.len()
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!("Workers exited with {} jobs unreported", total - messages.len());
                    break;
                }
            }
        }

        if messages.len() < total {
            let mut reported = vec![false; total];
            for message in &messages {
                reported[message.outcome.trial_number()] = true;
            }
            for (n, params) in sets.iter().enumerate().filter(|(n, _)| !reported[*n]) {
                let outcome = TrialOutcome::cancelled(
                    Trial::new(status.id, n, params.clone()),
                    "job did not finish before the dispatcher shut down",
                );
                status.record(&outcome);
                messages.push(JobMessage {
                    outcome,
                    curves: Vec::new(),
                });
            }
        }
        status.mark_completed();

        let table = ResultsTable::for_sweep(&self.settings.results_dir, sets.first());
        let rows: Vec<ParameterSet> = messages.iter().map(|m| m.outcome.to_row()).collect();
        table.write(&rows, &METRIC_COLUMNS)?;

        let curves_path = if self.settings.save_curves {
            let curves = CurveTable::for_sweep(&self.settings.results_dir, sets.first());
            curves.write(&curve_rows(&messages))?;
            Some(curves.path().to_path_buf())
        } else {
            None
        };

        info!(
            "Sweep {} finished: {} completed, {} failed, {} cancelled",
            name, status.trials_completed, status.trials_failed, status.trials_cancelled
        );
        if let Some(best) = &status.best_trial {
            info!(
                "Best trial {} (run {}): mean_val_loss {:.4}",
                best.trial_number, best.run_id, best.objective
            );
        }

        Ok(SweepReport {
            status,
            outcomes: messages.into_iter().map(|m| m.outcome).collect(),
            results_path: table.path().to_path_buf(),
            curves_path,
        })
    }
}

/// Run one job with panic isolation. Always yields exactly one message.
fn execute(mut trial: Trial, settings: &JobSettings, context: &JobContext) -> JobMessage {
    let span = info_span!("job", trial = trial.trial_number);
    let _guard = span.enter();

    let lease = context.allocator.acquire(trial.trial_number);
    let worker = std::thread::current().name().map(str::to_string);
    trial.mark_running(worker, lease.device());
    info!("Running on {}: {}", lease.device(), trial.parameters);

    let deadline = Deadline::from_timeout(context.timeout);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        TrainingJob::new(context.source.as_ref(), context.scaffold_fn.as_ref(), settings)
            .with_seed(context.seed)
            .with_deadline(deadline)
            .run()
    }));
    drop(lease);

    match result {
        Ok(Ok(report)) => {
            info!(
                "Completed: mean_val_loss {:.4} (std {:.4})",
                report.metrics.mean_val_loss, report.metrics.std_val_loss
            );
            JobMessage {
                outcome: TrialOutcome::completed(trial, report.metrics),
                curves: report.curves,
            }
        }
        Ok(Err(e)) if e.is_cancellation() => {
            warn!("Cancelled: {}", e);
            JobMessage {
                outcome: TrialOutcome::cancelled(trial, e.to_string()),
                curves: Vec::new(),
            }
        }
        Ok(Err(e)) => {
            error!("Failed: {}", e);
            let e = MsError::Worker {
                trial: trial.trial_number,
                message: e.to_string(),
            };
            JobMessage {
                outcome: TrialOutcome::failed(trial, e.to_string()),
                curves: Vec::new(),
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Worker panicked: {}", message);
            let e = MsError::Worker {
                trial: trial.trial_number,
                message: format!("panicked: {message}"),
            };
            JobMessage {
                outcome: TrialOutcome::failed(trial, e.to_string()),
                curves: Vec::new(),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn curve_rows(messages: &[JobMessage]) -> Vec<CurveRow> {
    messages
        .iter()
        .flat_map(|m| {
            let trial = m.outcome.trial_number();
            m.curves.iter().enumerate().flat_map(move |(fold, record)| {
                record.epochs().iter().map(move |log| CurveRow {
                    trial,
                    fold,
                    epoch: log.epoch,
                    train_loss: log.train_loss,
                    valid_loss: log.valid_loss,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_data::InMemorySource;

    fn grid(text: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let settings = DispatchSettings::default()
            .with_max_workers(2)
            .with_results_dir(dir);
        Dispatcher::new(settings, Arc::new(InMemorySource::new())).with_accelerators(0)
    }

    #[test]
    fn expand_uses_coupled_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(dir.path());
        d.settings = d.settings.clone().with_coupled("a", "b");
        let sets = d.expand(&grid("a: [1, 2]\nb: [10, 20]\nc: 3\n")).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1].get("b").and_then(|v| v.as_i64()), Some(20));
    }

    #[test]
    fn invalid_set_is_fatal_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let sets = vec![ParameterSet::new().with("task", "potency")];
        let err = d.run("bad", sets).unwrap_err();
        assert!(matches!(err, MsError::Config(_)));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn missing_dataset_becomes_failed_row() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let sets = d
            .expand(&grid(
                "task: potency\ntarget_task: pIC50\nrepr_model: Fingerprint\nproj_model: [4]\n\
                 epochs: 2\nlr: [0.01, 0.001]\nweight_decay: 0.0\nbatch_size: 4\n\
                 num_cv_folds: 2\nnum_cv_bins: 2\nscaffold_split_val_sz: 0.2\n",
            ))
            .unwrap();
        let report = d.run("missing", sets).unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.status.trials_failed, 2);
        assert!(report.results_path.exists());
        let row = &report.rows()[0];
        assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("failed"));
        assert!(row
            .get("error")
            .and_then(|v| v.as_str())
            .is_some_and(|e| e.contains("not available")));
    }

    #[test]
    fn panic_payloads_are_readable() {
        let caught = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");
        let caught = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }
}
