// One sweep job: load the train partition, split by scaffold, cross-validate

use ms_data::{scaffold_split, DatasetSource, ScaffoldFn, SplitSummary, DEFAULT_FOLD_SEED};
use ms_optimizer::MetricsRecord;
use ms_types::{JobSettings, MsResult, Partition};
use tracing::info;

use crate::cv::{CvReport, FoldOrchestrator};
use crate::training::{Deadline, PerformanceRecord};

/// Everything a finished job hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub metrics: MetricsRecord,
    pub curves: Vec<PerformanceRecord>,
    pub split: SplitSummary,
}

pub struct TrainingJob<'a> {
    source: &'a dyn DatasetSource,
    scaffold_fn: &'a dyn ScaffoldFn,
    settings: &'a JobSettings,
    seed: u64,
    deadline: Deadline,
}

impl<'a> TrainingJob<'a> {
    pub fn new(
        source: &'a dyn DatasetSource,
        scaffold_fn: &'a dyn ScaffoldFn,
        settings: &'a JobSettings,
    ) -> Self {
        Self {
            source,
            scaffold_fn,
            settings,
            seed: DEFAULT_FOLD_SEED,
            deadline: Deadline::none(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn run(&self) -> MsResult<JobReport> {
        let s = self.settings;
        let dataset = self.source.load(s.task, &s.target_task, Partition::Train)?;
        info!(
            "Loaded {} records for {}/{} from {}",
            dataset.len(),
            s.task,
            s.target_task,
            self.source.name()
        );

        let split = scaffold_split(&dataset, s.scaffold_split_val_sz, self.scaffold_fn)?;
        let train = dataset.subset(&split.train)?;
        let test = dataset.subset(&split.test)?;

        let report = FoldOrchestrator::new(s)
            .with_seed(self.seed)
            .with_deadline(self.deadline)
            .run(&train, &test)?;

        Ok(JobReport {
            metrics: metrics_record(&report, s.patience),
            curves: report.curves,
            split: split.summary,
        })
    }
}

fn metrics_record(report: &CvReport, patience: usize) -> MetricsRecord {
    MetricsRecord {
        mean_val_loss: report.mean_loss,
        std_val_loss: report.std_loss,
        final_epochs: report.final_epochs,
        patience,
        mae_test_scaffold: report.mae_test_scaffold,
        fold_losses: report.fold_losses.clone(),
    }
}
