//! # ms-engine
//!
//! Training and dispatch for molsweep: a small regression model and its
//! optimizer, the early-stopping training loop, stratified cross-validation
//! with a scaffold refit, and the parallel sweep dispatcher that turns a
//! hyperparameter grid into a results table.

pub mod cv;
pub mod dispatcher;
pub mod job;
pub mod loss;
pub mod model;
pub mod optim;
pub mod training;

pub use cv::{mean_and_std, CvReport, FoldOrchestrator};
pub use dispatcher::{Dispatcher, SweepReport};
pub use job::{JobReport, TrainingJob};
pub use model::{Model, MolecularModel, ParamSlot};
pub use optim::Adam;
pub use training::{
    Deadline, EarlyStopping, EpochLog, EpochRunner, Learner, PerformanceRecord, RunSummary,
    StopState, TrainingLoop,
};
