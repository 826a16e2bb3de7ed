use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// A structural descriptor (SMILES) paired with a continuous target value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoleculeRecord {
    pub smiles: String,
    pub target: f64,
}

impl MoleculeRecord {
    pub fn new(smiles: impl Into<String>, target: f64) -> Self {
        Self {
            smiles: smiles.into(),
            target,
        }
    }
}

/// Grouping key derived from a molecule's structure.
///
/// Every descriptor that cannot be parsed collapses into the single
/// `Unparseable` group; such records stay in the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaffoldKey {
    Framework(String),
    Unparseable,
}

impl ScaffoldKey {
    pub fn is_unparseable(&self) -> bool {
        matches!(self, ScaffoldKey::Unparseable)
    }
}

impl fmt::Display for ScaffoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaffoldKey::Framework(key) if key.is_empty() => write!(f, "<acyclic>"),
            ScaffoldKey::Framework(key) => write!(f, "{key}"),
            ScaffoldKey::Unparseable => write!(f, "<unparseable>"),
        }
    }
}

/// Dataset pipeline selector. A closed set: each variant maps to one loading strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Admet,
    Potency,
    MoleculeNet,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Admet => "admet",
            Task::Potency => "potency",
            Task::MoleculeNet => "molecule_net",
        }
    }

    /// Polaris tasks ship separate train and test files.
    pub fn is_polaris(&self) -> bool {
        matches!(self, Task::Admet | Task::Potency)
    }

    /// ADMET endpoints span orders of magnitude and are modelled in log10 space.
    pub fn log_transform(&self) -> bool {
        matches!(self, Task::Admet)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admet" => Ok(Task::Admet),
            "potency" => Ok(Task::Potency),
            "molecule_net" | "moleculenet" => Ok(Task::MoleculeNet),
            _ => Err(ConfigError::UnknownTask {
                task: s.to_string(),
            }),
        }
    }
}

/// Which half of a task's published data to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    Train,
    Test,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Train => write!(f, "train"),
            Partition::Test => write!(f, "test"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_parsing() {
        assert_eq!("potency".parse::<Task>().unwrap(), Task::Potency);
        assert_eq!("ADMET".parse::<Task>().unwrap(), Task::Admet);
        assert_eq!("molecule_net".parse::<Task>().unwrap(), Task::MoleculeNet);
        assert!(matches!(
            "qm9".parse::<Task>(),
            Err(ConfigError::UnknownTask { .. })
        ));
    }

    #[test]
    fn task_properties() {
        assert!(Task::Admet.log_transform());
        assert!(!Task::Potency.log_transform());
        assert!(Task::Potency.is_polaris());
        assert!(!Task::MoleculeNet.is_polaris());
    }

    #[test]
    fn scaffold_key_display() {
        assert_eq!(ScaffoldKey::Unparseable.to_string(), "<unparseable>");
        assert_eq!(ScaffoldKey::Framework(String::new()).to_string(), "<acyclic>");
        assert_eq!(ScaffoldKey::Framework("6:ab".into()).to_string(), "6:ab");
    }
}
