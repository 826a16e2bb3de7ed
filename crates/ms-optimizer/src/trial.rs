//! Trial tracking and sweep run management.

use chrono::{DateTime, Utc};
use ms_types::{ParameterSet, ParameterValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workers::Device;

/// Unique sweep run identifier.
pub type SweepId = Uuid;

/// Metric columns appended after the parameter columns of every row.
pub const METRIC_COLUMNS: [&str; 10] = [
    "status",
    "error",
    "mean_val_loss",
    "std_val_loss",
    "final_epochs",
    "patience",
    "mae_test_scaffold",
    "device",
    "duration_secs",
    "run_id",
];

/// Lifecycle state for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Pending,
    Running,
    Completed,
}

/// Aggregate status of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStatus {
    pub id: SweepId,
    pub name: String,
    pub state: SweepState,
    pub trials_submitted: usize,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub trials_cancelled: usize,
    /// Completed trial with the lowest mean validation loss.
    pub best_trial: Option<BestTrial>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepStatus {
    pub fn new(name: impl Into<String>, trials_submitted: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: SweepState::Pending,
            trials_submitted,
            trials_completed: 0,
            trials_failed: 0,
            trials_cancelled: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = SweepState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = SweepState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn trials_finished(&self) -> usize {
        self.trials_completed + self.trials_failed + self.trials_cancelled
    }

    /// Count an outcome and keep the best completed trial.
    pub fn record(&mut self, outcome: &TrialOutcome) {
        match outcome.trial.status {
            TrialStatus::Completed => self.trials_completed += 1,
            TrialStatus::Failed => self.trials_failed += 1,
            TrialStatus::Cancelled => self.trials_cancelled += 1,
            TrialStatus::Pending | TrialStatus::Running => return,
        }
        if let Some(metrics) = &outcome.metrics {
            self.update_best(BestTrial {
                trial_number: outcome.trial.trial_number,
                run_id: outcome.trial.id,
                objective: metrics.mean_val_loss,
                parameters: outcome.trial.parameters.clone(),
            });
        }
    }

    /// Replace the best trial if `candidate` has a strictly lower objective.
    pub fn update_best(&mut self, candidate: BestTrial) {
        if !candidate.objective.is_finite() {
            return;
        }
        let improves = match &self.best_trial {
            None => true,
            Some(current) => candidate.objective < current.objective,
        };
        if improves {
            self.best_trial = Some(candidate);
        }
    }
}

/// Summary of the best trial seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    pub trial_number: usize,
    pub run_id: Uuid,
    pub objective: f64,
    pub parameters: ParameterSet,
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial: one parameter set trained and cross-validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub sweep_id: SweepId,
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub status: TrialStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub device: Option<Device>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(sweep_id: SweepId, trial_number: usize, parameters: ParameterSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            sweep_id,
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            device: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>, device: Device) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
        self.device = Some(device);
    }

    pub fn mark_completed(&mut self) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn mark_cancelled(&mut self, reason: String) {
        self.status = TrialStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.error = Some(reason);
    }

    /// Wall-clock seconds between start and finish, when both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TrialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Metrics derived by a completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub mean_val_loss: f64,
    /// Population standard deviation of the fold losses.
    pub std_val_loss: f64,
    /// Epochs trained by the last fold.
    pub final_epochs: usize,
    pub patience: usize,
    /// MAE of the refit model on the held-out scaffold partition.
    pub mae_test_scaffold: Option<f64>,
    pub fold_losses: Vec<f64>,
}

/// The single message a job sends back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial: Trial,
    pub metrics: Option<MetricsRecord>,
}

impl TrialOutcome {
    pub fn completed(mut trial: Trial, metrics: MetricsRecord) -> Self {
        trial.mark_completed();
        Self {
            trial,
            metrics: Some(metrics),
        }
    }

    pub fn failed(mut trial: Trial, error: impl Into<String>) -> Self {
        trial.mark_failed(error.into());
        Self {
            trial,
            metrics: None,
        }
    }

    pub fn cancelled(mut trial: Trial, reason: impl Into<String>) -> Self {
        trial.mark_cancelled(reason.into());
        Self {
            trial,
            metrics: None,
        }
    }

    pub fn trial_number(&self) -> usize {
        self.trial.trial_number
    }

    pub fn status(&self) -> TrialStatus {
        self.trial.status
    }

    /// Table row: the parameter set followed by the metric columns present.
    pub fn to_row(&self) -> ParameterSet {
        let mut metrics = ParameterSet::new().with("status", self.trial.status.as_str());
        if let Some(error) = &self.trial.error {
            metrics = metrics.with("error", error.as_str());
        }
        if let Some(m) = &self.metrics {
            metrics = metrics
                .with("mean_val_loss", m.mean_val_loss)
                .with("std_val_loss", m.std_val_loss)
                .with("final_epochs", m.final_epochs as i64)
                .with("patience", m.patience as i64);
            if let Some(mae) = m.mae_test_scaffold {
                metrics = metrics.with("mae_test_scaffold", mae);
            }
        }
        if let Some(device) = self.trial.device {
            metrics = metrics.with("device", device.to_string());
        }
        if let Some(secs) = self.trial.duration_secs() {
            metrics = metrics.with("duration_secs", ParameterValue::Float(secs));
        }
        metrics = metrics.with("run_id", self.trial.id.to_string());
        self.trial.parameters.merged(&metrics)
    }
}
