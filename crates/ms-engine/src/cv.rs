// Stratified cross-validation of one hyperparameter set, plus the scaffold refit

use ms_data::{quantile_bins, Featurizer, MoleculeDataset, StratifiedKFold, DEFAULT_FOLD_SEED};
use ms_types::{FoldLossSelection, JobSettings, MsResult, TrainingError};
use tracing::{debug, info};

use crate::loss::mean_absolute_error;
use crate::model::{Model, MolecularModel};
use crate::optim::Adam;
use crate::training::{Deadline, EpochRunner, Learner, PerformanceRecord, TrainingLoop};

/// Cross-validation result of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct CvReport {
    pub fold_losses: Vec<f64>,
    pub mean_loss: f64,
    /// Population standard deviation of the fold losses.
    pub std_loss: f64,
    /// Epochs trained by the last fold.
    pub final_epochs: usize,
    /// Per-fold epoch history, indexed by fold.
    pub curves: Vec<PerformanceRecord>,
    pub mae_test_scaffold: Option<f64>,
}

/// Runs k-fold CV over a train partition: one fresh model, optimizer and
/// training loop per fold.
#[derive(Debug, Clone)]
pub struct FoldOrchestrator<'a> {
    settings: &'a JobSettings,
    seed: u64,
    deadline: Deadline,
}

impl<'a> FoldOrchestrator<'a> {
    pub fn new(settings: &'a JobSettings) -> Self {
        Self {
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

    /// Cross-validate on `train`, then refit on all of `train` and score on
    /// `test` when refit is enabled and `test` is non-empty.
    pub fn run(&self, train: &MoleculeDataset, test: &MoleculeDataset) -> MsResult<CvReport> {
        let s = self.settings;
        let featurizer = Featurizer::for_repr(&s.repr, s.fp_radius, s.fp_bits);
        let features = featurizer.featurize_dataset(train);
        let targets = train.targets();

        let labels = quantile_bins(&targets, s.num_cv_bins)?;
        let folds = StratifiedKFold::new(s.num_cv_folds)
            .with_seed(self.seed)
            .split(&labels)?;

        let mut fold_losses = Vec::with_capacity(folds.len());
        let mut curves = Vec::with_capacity(folds.len());
        let mut final_epochs = 0;

        for (fold_idx, fold) in folds.iter().enumerate() {
            let (train_x, train_y) = gather(&features, &targets, &fold.train);
            let (valid_x, valid_y) = gather(&features, &targets, &fold.valid);

            let learner = Learner::new(
                self.fresh_model(featurizer.dim()),
                Adam::new(s.lr, s.weight_decay),
                s.loss,
                s.batch_size,
                self.seed.wrapping_add(fold_idx as u64),
            )
            .with_train(&train_x, &train_y)
            .with_valid(&valid_x, &valid_y);

            let summary = TrainingLoop::new(learner, s.epochs)
                .with_early_stopping(s.patience)
                .with_deadline(self.deadline)
                .run()?;

            let loss = match s.fold_loss {
                FoldLossSelection::Best => summary.best_loss,
                FoldLossSelection::Last => summary.last_loss,
            };
            info!(
                "Fold {}/{}: loss {:.4} after {} epochs{}",
                fold_idx + 1,
                folds.len(),
                loss,
                summary.epochs_trained,
                if summary.stopped_early { " (early stop)" } else { "" }
            );

            fold_losses.push(loss);
            final_epochs = summary.epochs_trained;
            curves.push(summary.record);
        }

        let (mean_loss, std_loss) = mean_and_std(&fold_losses);

        let mae_test_scaffold = if s.refit && !test.is_empty() {
            Some(self.refit(&featurizer, &features, &targets, test)?)
        } else {
            if s.refit {
                debug!("Skipping refit: scaffold test partition is empty");
            }
            None
        };

        Ok(CvReport {
            fold_losses,
            mean_loss,
            std_loss,
            final_epochs,
            curves,
            mae_test_scaffold,
        })
    }

    fn fresh_model(&self, input_dim: usize) -> MolecularModel {
        MolecularModel::new(
            input_dim,
            &self.settings.repr.hidden,
            &self.settings.proj_hidden,
            self.seed,
        )
    }

    /// Full epoch budget on the whole train partition, no early stopping.
    fn refit(
        &self,
        featurizer: &Featurizer,
        features: &[Vec<f64>],
        targets: &[f64],
        test: &MoleculeDataset,
    ) -> MsResult<f64> {
        let s = self.settings;
        let mut learner = Learner::new(
            self.fresh_model(featurizer.dim()),
            Adam::new(s.lr, s.weight_decay),
            s.loss,
            s.batch_size,
            self.seed,
        )
        .with_train(features, targets);

        for epoch in 1..=s.epochs {
            self.deadline.check(epoch)?;
            let loss = learner.train_epoch(epoch, &self.deadline)?;
            if !loss.is_finite() {
                return Err(TrainingError::Diverged { epoch, loss }.into());
            }
        }

        let test_x = featurizer.featurize_dataset(test);
        let predictions = learner.model().predict(&test_x)?;
        let mae = mean_absolute_error(&predictions, &test.targets())?;
        info!("Refit on {} samples: test scaffold MAE {:.4}", features.len(), mae);
        Ok(mae)
    }
}

fn gather(features: &[Vec<f64>], targets: &[f64], indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
    indices
        .iter()
        .map(|&i| (features[i].clone(), targets[i]))
        .unzip()
}

/// Mean and population standard deviation.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
