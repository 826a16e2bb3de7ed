use thiserror::Error;

/// Main error type for the molsweep system
#[derive(Error, Debug)]
pub enum MsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Binning error: {0}")]
    Binning(#[from] BinningError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Worker error in trial {trial}: {message}")]
    Worker { trial: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Sweep configuration errors. Always fatal before any job is dispatched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Coupled keys {first} ({first_len} values) and {second} ({second_len} values) must have the same length")]
    LengthMismatch {
        first: String,
        second: String,
        first_len: usize,
        second_len: usize,
    },

    #[error("Coupled key not present in search space: {key}")]
    CoupledKeyMissing { key: String },

    #[error("Test fraction must lie strictly between 0 and 1, got {value}")]
    InvalidFraction { value: f64 },

    #[error("Cannot make {folds} folds from {samples} samples (need 2 <= folds <= samples)")]
    InvalidFoldCount { folds: usize, samples: usize },

    #[error("Unknown task: {task}")]
    UnknownTask { task: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Data-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Data source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Partition {partition} is not available for task {task}")]
    PartitionUnavailable { task: String, partition: String },

    #[error("Unparsable structural descriptor {descriptor:?}: {message}")]
    UnparsableDescriptor { descriptor: String, message: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Quantile binning errors raised while building stratification labels
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BinningError {
    #[error("Bin count must be at least 1")]
    ZeroBins,

    #[error("Cannot cut values into bins: no values")]
    NoValues,

    #[error("Requested {bins} bins but only {distinct} distinct target values are available")]
    TooManyBins { bins: usize, distinct: usize },

    #[error("Quantile edges for {bins} bins are not unique")]
    DuplicateEdges { bins: usize },

    #[error("Target value {value} is not finite")]
    NonFinite { value: f64 },
}

/// Errors raised inside a single training run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("Loss diverged at epoch {epoch}: {loss}")]
    Diverged { epoch: usize, loss: f64 },

    #[error("Run cancelled at epoch {epoch}: deadline exceeded")]
    Cancelled { epoch: usize },

    #[error("No batches in {partition} partition")]
    EmptyPartition { partition: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

impl MsError {
    /// Whether this error represents a cooperative cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MsError::Training(TrainingError::Cancelled { .. }))
    }
}

/// Result type alias for molsweep operations
pub type MsResult<T> = Result<T, MsError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::MsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ConfigError::Invalid { message: format!($($arg)*) }
    };
}
