//! Sweep configuration: dispatch settings, the config file layout, and the
//! typed per-job settings validated out of a [`ParameterSet`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ConfigError, MsResult};
use crate::molecule::Task;
use crate::params::{ParameterSet, ParameterValue};

/// How jobs are mapped onto accelerators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStrategy {
    /// Never use an accelerator.
    Cpu,
    /// Job `n` runs on accelerator `n % count`. Several jobs may share one device.
    RoundRobin,
    /// A job holds an accelerator for its whole run; other jobs wait for a free one.
    Exclusive,
}

impl Default for DeviceStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Sweep-level settings that are never expanded into the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Upper bound on concurrent jobs; the pool is further capped by available parallelism.
    pub max_workers: usize,
    /// Per-job wall-clock budget. `None` waits forever.
    pub job_timeout_secs: Option<f64>,
    /// How long the dispatcher waits past the last expected deadline before
    /// declaring silent jobs cancelled.
    pub shutdown_grace_secs: f64,
    /// Accelerator count. `None` probes `MOLSWEEP_ACCELERATORS`.
    pub accelerators: Option<usize>,
    pub device_strategy: DeviceStrategy,
    /// Key whose value is copied into every parameter set without expansion.
    pub pass_through: Option<String>,
    /// Key pair zipped index-wise instead of cross-producted.
    pub coupled: Option<(String, String)>,
    pub data_root: PathBuf,
    pub results_dir: PathBuf,
    /// Persist per-fold loss curves next to the results table.
    pub save_curves: bool,
    /// Seed for fold shuffling, batch order and model initialization.
    pub seed: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_workers: 8,
            job_timeout_secs: None,
            shutdown_grace_secs: 30.0,
            accelerators: None,
            device_strategy: DeviceStrategy::default(),
            pass_through: None,
            coupled: None,
            data_root: PathBuf::from("./data"),
            results_dir: PathBuf::from("./results"),
            save_curves: false,
            seed: 42,
        }
    }
}

impl DispatchSettings {
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn with_job_timeout(mut self, secs: f64) -> Self {
        self.job_timeout_secs = Some(secs);
        self
    }

    pub fn with_accelerators(mut self, count: usize, strategy: DeviceStrategy) -> Self {
        self.accelerators = Some(count);
        self.device_strategy = strategy;
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_coupled(mut self, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.coupled = Some((first.into(), second.into()));
        self
    }

    pub fn with_pass_through(mut self, key: impl Into<String>) -> Self {
        self.pass_through = Some(key.into());
        self
    }

    pub fn with_curves(mut self, save: bool) -> Self {
        self.save_curves = save;
        self
    }

    /// Apply environment overrides, read through `lookup` so tests need not touch the process env.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MOLSWEEP_MAX_WORKERS") {
            self.max_workers = raw.trim().parse().map_err(|_| ConfigError::InvalidParameter {
                name: "MOLSWEEP_MAX_WORKERS".to_string(),
                message: format!("expected a positive integer, got {raw:?}"),
            })?;
        }
        if let Some(raw) = lookup("MOLSWEEP_DATA_ROOT") {
            self.data_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("MOLSWEEP_RESULTS_DIR") {
            self.results_dir = PathBuf::from(raw);
        }
        Ok(self)
    }

    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(secs) = self.job_timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::InvalidParameter {
                    name: "job_timeout_secs".to_string(),
                    message: format!("must be a non-negative number of seconds, got {secs}"),
                });
            }
        }
        if !self.shutdown_grace_secs.is_finite() || self.shutdown_grace_secs < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "shutdown_grace_secs".to_string(),
                message: format!("must be non-negative, got {}", self.shutdown_grace_secs),
            });
        }
        if let Some((first, second)) = &self.coupled {
            if first == second {
                return Err(ConfigError::InvalidParameter {
                    name: "coupled".to_string(),
                    message: format!("a key cannot be coupled with itself ({first})"),
                });
            }
            if let Some(key) = &self.pass_through {
                if key == first || key == second {
                    return Err(ConfigError::InvalidParameter {
                        name: "pass_through".to_string(),
                        message: format!("{key} is also a coupled key"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace_secs)
    }
}

/// Layout of a sweep config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFile {
    #[serde(default)]
    pub sweep: DispatchSettings,
    /// The hyperparameter grid, in file order.
    pub params: serde_yaml::Mapping,
}

impl SweepFile {
    pub fn from_yaml_str(text: &str) -> MsResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> MsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Resolve a config name: an existing path is used as-is, otherwise it is looked up in `./config/`.
    pub fn resolve_path(name: &str) -> PathBuf {
        let direct = PathBuf::from(name);
        if direct.exists() {
            direct
        } else {
            Path::new(".").join("config").join(name)
        }
    }
}

/// Training loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    L1,
    Mse,
}

/// Which validation loss of a fold counts toward the sweep summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldLossSelection {
    /// Lowest validation loss seen during the run.
    Best,
    /// Validation loss of the final epoch trained.
    Last,
}

/// Input encoding used by the representation sub-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncoderKind {
    /// Hashed circular atom environments up to `fp_radius` bonds.
    Fingerprint,
    /// Hashed element counts (radius zero environments).
    AtomCounts,
}

/// Representation sub-model architecture: an encoder plus dense layer widths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprSpec {
    pub encoder: EncoderKind,
    pub hidden: Vec<usize>,
}

impl ReprSpec {
    const DEFAULT_WIDTH: usize = 64;

    pub fn from_value(value: &ParameterValue) -> Result<Self, ConfigError> {
        match value {
            ParameterValue::Text(name) => {
                let encoder = match name.to_lowercase().as_str() {
                    "fingerprint" | "ecfp" | "wl" | "linear" => EncoderKind::Fingerprint,
                    "atom_counts" | "atoms" => EncoderKind::AtomCounts,
                    _ => {
                        return Err(ConfigError::InvalidParameter {
                            name: "repr_model".to_string(),
                            message: format!("unknown representation model {name:?}"),
                        })
                    }
                };
                let hidden = if name.eq_ignore_ascii_case("linear") {
                    Vec::new()
                } else {
                    vec![Self::DEFAULT_WIDTH]
                };
                Ok(Self { encoder, hidden })
            }
            other => Ok(Self {
                encoder: EncoderKind::Fingerprint,
                hidden: widths("repr_model", other)?,
            }),
        }
    }
}

/// Parse an integer or a list of positive integers into layer widths.
fn widths(name: &str, value: &ParameterValue) -> Result<Vec<usize>, ConfigError> {
    let invalid = || ConfigError::InvalidParameter {
        name: name.to_string(),
        message: format!("expected a layer width or a list of layer widths, got {value}"),
    };
    let items: Vec<&ParameterValue> = match value {
        ParameterValue::List(items) => items.iter().collect(),
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| item.as_usize().filter(|w| *w > 0).ok_or_else(invalid))
        .collect()
}

/// Typed, validated settings for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    pub task: Task,
    pub target_task: String,
    pub repr: ReprSpec,
    pub proj_hidden: Vec<usize>,
    pub epochs: usize,
    pub lr: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub num_cv_folds: usize,
    pub num_cv_bins: usize,
    pub scaffold_split_val_sz: f64,
    pub patience: usize,
    pub loss: LossKind,
    pub fold_loss: FoldLossSelection,
    pub refit: bool,
    pub fp_radius: usize,
    pub fp_bits: usize,
}

impl JobSettings {
    pub const DEFAULT_PATIENCE: usize = 5;

    pub fn from_params(params: &ParameterSet) -> Result<Self, ConfigError> {
        let reader = ParamReader { params };

        let task_name = reader.text("task")?;
        let task: Task = task_name.parse()?;

        let target_task = reader.text("target_task")?.to_string();
        if target_task.is_empty() {
            return Err(reader.invalid("target_task", "must not be empty"));
        }

        let repr = ReprSpec::from_value(reader.required("repr_model")?)?;
        let proj_hidden = match reader.required("proj_model")? {
            ParameterValue::List(items) if items.is_empty() => Vec::new(),
            other => widths("proj_model", other)?,
        };

        let epochs = reader.positive_usize("epochs")?;

        let lr = reader.number("lr")?;
        if !(lr.is_finite() && lr > 0.0) {
            return Err(reader.invalid("lr", "must be a positive finite number"));
        }
        let weight_decay = reader.number("weight_decay")?;
        if !(weight_decay.is_finite() && weight_decay >= 0.0) {
            return Err(reader.invalid("weight_decay", "must be a non-negative finite number"));
        }

        let batch_size = reader.positive_usize("batch_size")?;

        let num_cv_folds = reader.positive_usize("num_cv_folds")?;
        if num_cv_folds < 2 {
            return Err(reader.invalid("num_cv_folds", "need at least 2 folds"));
        }
        let num_cv_bins = reader.positive_usize("num_cv_bins")?;

        let scaffold_split_val_sz = reader.number("scaffold_split_val_sz")?;
        if !(scaffold_split_val_sz > 0.0 && scaffold_split_val_sz < 1.0) {
            return Err(ConfigError::InvalidFraction {
                value: scaffold_split_val_sz,
            });
        }

        let patience = match params.get("patience") {
            Some(_) => reader.positive_usize("patience")?,
            None => Self::DEFAULT_PATIENCE,
        };

        let loss = match params.get("loss") {
            None => LossKind::L1,
            Some(_) => match reader.text("loss")?.to_lowercase().as_str() {
                "l1" | "mae" => LossKind::L1,
                "mse" | "l2" => LossKind::Mse,
                other => return Err(reader.invalid("loss", &format!("unknown loss {other:?}"))),
            },
        };

        let fold_loss = match params.get("fold_loss") {
            None => FoldLossSelection::Best,
            Some(_) => match reader.text("fold_loss")?.to_lowercase().as_str() {
                "best" => FoldLossSelection::Best,
                "last" | "final" => FoldLossSelection::Last,
                other => {
                    return Err(reader.invalid("fold_loss", &format!("expected best or last, got {other:?}")))
                }
            },
        };

        let refit = match params.get("refit") {
            None => true,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| reader.invalid("refit", "expected true or false"))?,
        };

        let fp_radius = match params.get("fp_radius") {
            None => 2,
            Some(value) => value
                .as_usize()
                .ok_or_else(|| reader.invalid("fp_radius", "expected a non-negative integer"))?,
        };
        let fp_bits = match params.get("fp_bits") {
            None => 256,
            Some(_) => reader.positive_usize("fp_bits")?,
        };

        Ok(Self {
            task,
            target_task,
            repr,
            proj_hidden,
            epochs,
            lr,
            weight_decay,
            batch_size,
            num_cv_folds,
            num_cv_bins,
            scaffold_split_val_sz,
            patience,
            loss,
            fold_loss,
            refit,
            fp_radius,
            fp_bits,
        })
    }
}

struct ParamReader<'a> {
    params: &'a ParameterSet,
}

impl<'a> ParamReader<'a> {
    fn required(&self, name: &str) -> Result<&'a ParameterValue, ConfigError> {
        self.params
            .get(name)
            .ok_or_else(|| ConfigError::MissingParameter {
                name: name.to_string(),
            })
    }

    fn invalid(&self, name: &str, message: &str) -> ConfigError {
        ConfigError::InvalidParameter {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn text(&self, name: &str) -> Result<&'a str, ConfigError> {
        self.required(name)?
            .as_str()
            .ok_or_else(|| self.invalid(name, "expected a string"))
    }

    fn number(&self, name: &str) -> Result<f64, ConfigError> {
        self.required(name)?
            .as_f64()
            .ok_or_else(|| self.invalid(name, "expected a number"))
    }

    fn positive_usize(&self, name: &str) -> Result<usize, ConfigError> {
        self.required(name)?
            .as_usize()
            .filter(|v| *v > 0)
            .ok_or_else(|| self.invalid(name, "expected a positive integer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> ParameterSet {
        ParameterSet::new()
            .with("task", "potency")
            .with("target_task", "pIC50")
            .with("repr_model", "fingerprint")
            .with("proj_model", vec![32i64, 16])
            .with("epochs", 20i64)
            .with("lr", 0.001)
            .with("weight_decay", 0.0)
            .with("batch_size", 32i64)
            .with("num_cv_folds", 5i64)
            .with("num_cv_bins", 4i64)
            .with("scaffold_split_val_sz", 0.2)
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let settings = JobSettings::from_params(&base_params()).unwrap();
        assert_eq!(settings.task, Task::Potency);
        assert_eq!(settings.patience, JobSettings::DEFAULT_PATIENCE);
        assert_eq!(settings.loss, LossKind::L1);
        assert_eq!(settings.fold_loss, FoldLossSelection::Best);
        assert!(settings.refit);
        assert_eq!(settings.proj_hidden, vec![32, 16]);
        assert_eq!(settings.repr.encoder, EncoderKind::Fingerprint);
        assert_eq!(settings.repr.hidden, vec![64]);
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let params: ParameterSet = base_params()
            .iter()
            .filter(|(k, _)| *k != "lr")
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let err = JobSettings::from_params(&params).unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter { name: "lr".into() });
    }

    #[test]
    fn fraction_out_of_range_is_rejected() {
        let params = base_params().with("scaffold_split_val_sz", 1.0);
        assert!(matches!(
            JobSettings::from_params(&params),
            Err(ConfigError::InvalidFraction { .. })
        ));
    }

    #[test]
    fn list_valued_repr_model_is_an_architecture() {
        let params = base_params().with("repr_model", vec![128i64, 64]);
        let settings = JobSettings::from_params(&params).unwrap();
        assert_eq!(settings.repr.hidden, vec![128, 64]);

        let bad = base_params().with("repr_model", vec![0i64]);
        assert!(JobSettings::from_params(&bad).is_err());
    }

    #[test]
    fn single_fold_is_rejected() {
        let params = base_params().with("num_cv_folds", 1i64);
        assert!(JobSettings::from_params(&params).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let settings = DispatchSettings::default()
            .apply_overrides(|key| match key {
                "MOLSWEEP_MAX_WORKERS" => Some("3".to_string()),
                "MOLSWEEP_RESULTS_DIR" => Some("/tmp/out".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.max_workers, 3);
        assert_eq!(settings.results_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.data_root, PathBuf::from("./data"));

        let bad = DispatchSettings::default().apply_overrides(|key| {
            (key == "MOLSWEEP_MAX_WORKERS").then(|| "many".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn pass_through_key_cannot_be_coupled() {
        let settings = DispatchSettings::default()
            .with_coupled("lr", "batch_size")
            .with_pass_through("batch_size");
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { ref name, .. } if name == "pass_through"));

        let settings = DispatchSettings::default()
            .with_coupled("lr", "batch_size")
            .with_pass_through("repr_model");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn sweep_file_parses_both_sections() {
        let text = r#"
sweep:
  max_workers: 2
  coupled: [repr_model, proj_model]
  device_strategy: exclusive
params:
  task: potency
  lr: [0.001, 0.01]
"#;
        let file = SweepFile::from_yaml_str(text).unwrap();
        assert_eq!(file.sweep.max_workers, 2);
        assert_eq!(file.sweep.device_strategy, DeviceStrategy::Exclusive);
        assert_eq!(
            file.sweep.coupled,
            Some(("repr_model".to_string(), "proj_model".to_string()))
        );
        assert_eq!(file.params.len(), 2);
        assert_eq!(file.sweep.seed, 42);
    }
}
