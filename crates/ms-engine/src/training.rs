//! Early-stopping training loop.
//!
//! A [`TrainingLoop`] drives any [`EpochRunner`] one epoch at a time: a
//! training pass, a validation pass, a typed [`EpochLog`] appended to the
//! [`PerformanceRecord`], then an early-stopping update. [`Learner`] is the
//! runner used for real models: shuffled mini-batches, Adam, and a selectable
//! loss.

use std::time::{Duration, Instant};

use ms_types::{LossKind, TrainingError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loss::{loss_and_grad, loss_value};
use crate::model::Model;
use crate::optim::Adam;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    Running,
    Stopped,
}

/// Stops once validation loss has not strictly improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    counter: usize,
    state: StopState,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            counter: 0,
            state: StopState::Running,
        }
    }

    pub fn update(&mut self, valid_loss: f64) -> StopState {
        if self.state == StopState::Stopped {
            return self.state;
        }
        if valid_loss < self.best_loss {
            self.best_loss = valid_loss;
            self.counter = 0;
        } else {
            self.counter += 1;
            if self.counter >= self.patience {
                self.state = StopState::Stopped;
            }
        }
        self.state
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn state(&self) -> StopState {
        self.state
    }
}

/// Losses of one epoch. Epochs are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLog {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
}

/// Ordered per-epoch history of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    epochs: Vec<EpochLog>,
}

impl PerformanceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, log: EpochLog) {
        self.epochs.push(log);
    }

    pub fn epochs(&self) -> &[EpochLog] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochLog> {
        self.epochs.last()
    }

    pub fn best_valid_loss(&self) -> Option<f64> {
        self.epochs
            .iter()
            .map(|e| e.valid_loss)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Optional wall-clock limit observed between epochs and batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self, epoch: usize) -> Result<(), TrainingError> {
        if self.expired() {
            Err(TrainingError::Cancelled { epoch })
        } else {
            Ok(())
        }
    }
}

/// One epoch of training and one of validation.
pub trait EpochRunner {
    /// Mean training loss of the epoch.
    fn train_epoch(&mut self, epoch: usize, deadline: &Deadline) -> Result<f64, TrainingError>;

    /// Mean validation loss, no gradient accumulation.
    fn validate(&mut self) -> Result<f64, TrainingError>;
}

impl<R: EpochRunner + ?Sized> EpochRunner for &mut R {
    fn train_epoch(&mut self, epoch: usize, deadline: &Deadline) -> Result<f64, TrainingError> {
        (**self).train_epoch(epoch, deadline)
    }

    fn validate(&mut self) -> Result<f64, TrainingError> {
        (**self).validate()
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub record: PerformanceRecord,
    /// Lowest validation loss seen.
    pub best_loss: f64,
    /// Validation loss of the last epoch trained.
    pub last_loss: f64,
    pub epochs_trained: usize,
    pub stopped_early: bool,
}

pub struct TrainingLoop<R> {
    runner: R,
    max_epochs: usize,
    early_stopping: Option<EarlyStopping>,
    deadline: Deadline,
}

impl<R: EpochRunner> TrainingLoop<R> {
    pub fn new(runner: R, max_epochs: usize) -> Self {
        Self {
            runner,
            max_epochs,
            early_stopping: None,
            deadline: Deadline::none(),
        }
    }

    pub fn with_early_stopping(mut self, patience: usize) -> Self {
        self.early_stopping = Some(EarlyStopping::new(patience));
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run to the epoch budget or until early stopping fires.
    pub fn run(mut self) -> Result<RunSummary, TrainingError> {
        let mut record = PerformanceRecord::new();
        let mut stopped_early = false;

        for epoch in 1..=self.max_epochs {
            self.deadline.check(epoch)?;

            let train_loss = self.runner.train_epoch(epoch, &self.deadline)?;
            if !train_loss.is_finite() {
                return Err(TrainingError::Diverged { epoch, loss: train_loss });
            }
            let valid_loss = self.runner.validate()?;
            if !valid_loss.is_finite() {
                return Err(TrainingError::Diverged { epoch, loss: valid_loss });
            }

            debug!(epoch, train_loss, valid_loss, "epoch finished");
            record.push(EpochLog {
                epoch,
                train_loss,
                valid_loss,
            });

            if let Some(stopper) = self.early_stopping.as_mut() {
                if stopper.update(valid_loss) == StopState::Stopped {
                    debug!(epoch, best = stopper.best_loss(), "early stopping");
                    stopped_early = true;
                    break;
                }
            }
        }

        // An empty record only happens with a zero epoch budget.
        let best_loss = record.best_valid_loss().unwrap_or(f64::INFINITY);
        let last_loss = record.last().map(|e| e.valid_loss).unwrap_or(f64::INFINITY);
        Ok(RunSummary {
            epochs_trained: record.len(),
            record,
            best_loss,
            last_loss,
            stopped_early,
        })
    }
}

/// Mini-batch trainer for a [`Model`] over pre-featurized rows.
pub struct Learner<'a, M> {
    model: M,
    optimizer: Adam,
    loss: LossKind,
    batch_size: usize,
    train_x: &'a [Vec<f64>],
    train_y: &'a [f64],
    valid_x: &'a [Vec<f64>],
    valid_y: &'a [f64],
    rng: ChaCha8Rng,
}

impl<'a, M: Model> Learner<'a, M> {
    pub fn new(model: M, optimizer: Adam, loss: LossKind, batch_size: usize, seed: u64) -> Self {
        Self {
            model,
            optimizer,
            loss,
            batch_size: batch_size.max(1),
            train_x: &[],
            train_y: &[],
            valid_x: &[],
            valid_y: &[],
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn with_train(mut self, x: &'a [Vec<f64>], y: &'a [f64]) -> Self {
        self.train_x = x;
        self.train_y = y;
        self
    }

    pub fn with_valid(mut self, x: &'a [Vec<f64>], y: &'a [f64]) -> Self {
        self.valid_x = x;
        self.valid_y = y;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: Model> EpochRunner for Learner<'_, M> {
    fn train_epoch(&mut self, epoch: usize, deadline: &Deadline) -> Result<f64, TrainingError> {
        if self.train_x.is_empty() {
            return Err(TrainingError::EmptyPartition {
                partition: "train".to_string(),
            });
        }
        if self.train_x.len() != self.train_y.len() {
            return Err(TrainingError::ShapeMismatch {
                expected: self.train_x.len(),
                actual: self.train_y.len(),
            });
        }

        let mut order: Vec<usize> = (0..self.train_x.len()).collect();
        order.shuffle(&mut self.rng);

        let mut total = 0.0;
        let mut batches = 0usize;
        for batch in order.chunks(self.batch_size) {
            deadline.check(epoch)?;

            let x: Vec<Vec<f64>> = batch.iter().map(|&i| self.train_x[i].clone()).collect();
            let y: Vec<f64> = batch.iter().map(|&i| self.train_y[i]).collect();

            self.model.zero_grad();
            let predictions = self.model.forward(&x)?;
            let (loss, grad) = loss_and_grad(self.loss, &predictions, &y)?;
            self.model.backward(&grad)?;
            self.optimizer.step(&mut self.model);

            total += loss;
            batches += 1;
        }
        Ok(total / batches as f64)
    }

    fn validate(&mut self) -> Result<f64, TrainingError> {
        if self.valid_x.is_empty() {
            return Err(TrainingError::EmptyPartition {
                partition: "valid".to_string(),
            });
        }
        if self.valid_x.len() != self.valid_y.len() {
            return Err(TrainingError::ShapeMismatch {
                expected: self.valid_x.len(),
                actual: self.valid_y.len(),
            });
        }

        // Unshuffled batches; the epoch loss is the mean of the batch means.
        let mut total = 0.0;
        let mut batches = 0usize;
        for (x, y) in self
            .valid_x
            .chunks(self.batch_size)
            .zip(self.valid_y.chunks(self.batch_size))
        {
            let predictions = self.model.predict(x)?;
            total += loss_value(self.loss, &predictions, y)?;
            batches += 1;
        }
        Ok(total / batches as f64)
    }
}
