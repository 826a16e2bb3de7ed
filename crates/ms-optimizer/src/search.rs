//! Search space definitions and grid expansion.

use ms_types::{config_error, ConfigError, ParameterSet, ParameterValue};
use serde::{Deserialize, Serialize};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Hyperparameter name (e.g. "lr").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter contributes to the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// One value used in every set.
    Fixed(ParameterValue),
    /// Candidate values; one grid axis.
    Choice { values: Vec<ParameterValue> },
}

impl ParameterKind {
    fn candidates(&self) -> Vec<ParameterValue> {
        match self {
            Self::Fixed(value) => vec![value.clone()],
            Self::Choice { values } => values.clone(),
        }
    }
}

/// The full search space: parameter definitions in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_fixed(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Fixed(value.into()),
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    /// Build a space from a YAML mapping. Sequences are candidate lists;
    /// everything else is a fixed value. Key order is preserved.
    pub fn from_yaml(mapping: &serde_yaml::Mapping) -> Result<Self, ConfigError> {
        let mut space = Self::new();
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| config_error!("parameter names must be strings, got {key:?}"))?;
            if space.position(name).is_some() {
                return Err(config_error!("parameter {name:?} is defined twice"));
            }
            space = match value {
                serde_yaml::Value::Sequence(items) => {
                    let values = items
                        .iter()
                        .map(|item| ParameterValue::from_yaml(name, item))
                        .collect::<Result<Vec<_>, _>>()?;
                    space.add_choice(name, values)
                }
                other => space.add_fixed(name, ParameterValue::from_yaml(name, other)?),
            };
        }
        Ok(space)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Exhaustive grid over a search space.
///
/// The first parameter varies slowest. A pass-through parameter is copied
/// intact into every set even when it holds a list, and one coupled pair may
/// be zipped index-wise instead of crossed.
#[derive(Debug, Clone)]
pub struct GridSearch {
    space: SearchSpace,
    pass_through: Option<String>,
    coupled: Option<(String, String)>,
}

impl GridSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self {
            space,
            pass_through: None,
            coupled: None,
        }
    }

    /// Copy `key` intact into every set. It may not also be a coupled key.
    pub fn with_pass_through(mut self, key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        if let Some((first, second)) = &self.coupled {
            if key == *first || key == *second {
                return Err(overlap_error(&key));
            }
        }
        self.pass_through = Some(key);
        Ok(self)
    }

    /// Zip two parameters together. Both must exist and have the same
    /// number of candidates; a fixed value counts as one candidate.
    pub fn with_coupled(
        mut self,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let (first, second) = (first.into(), second.into());
        if first == second {
            return Err(config_error!("cannot couple {first:?} with itself"));
        }
        if let Some(key) = &self.pass_through {
            if *key == first || *key == second {
                return Err(overlap_error(key));
            }
        }
        let first_len = self.axis_len(&first)?;
        let second_len = self.axis_len(&second)?;
        if first_len != second_len {
            return Err(ConfigError::LengthMismatch {
                first,
                second,
                first_len,
                second_len,
            });
        }
        self.coupled = Some((first, second));
        Ok(self)
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    fn axis_len(&self, name: &str) -> Result<usize, ConfigError> {
        self.space
            .get(name)
            .map(|def| def.kind.candidates().len())
            .ok_or_else(|| ConfigError::CoupledKeyMissing {
                key: name.to_string(),
            })
    }

    /// Each axis lists its options; an option assigns values to parameter positions.
    fn axes(&self) -> Vec<Vec<Vec<(usize, ParameterValue)>>> {
        let coupled = self
            .coupled
            .as_ref()
            .and_then(|(a, b)| Some((self.space.position(a)?, self.space.position(b)?)));

        let mut axes = Vec::with_capacity(self.space.len());
        for (pos, param) in self.space.parameters.iter().enumerate() {
            if self.pass_through.as_deref() == Some(param.name.as_str()) {
                let value = match &param.kind {
                    ParameterKind::Fixed(value) => value.clone(),
                    ParameterKind::Choice { values } => ParameterValue::List(values.clone()),
                };
                axes.push(vec![vec![(pos, value)]]);
                continue;
            }
            match coupled {
                Some((first, second)) if pos == first => {
                    let partner = self.space.parameters[second].kind.candidates();
                    axes.push(
                        param
                            .kind
                            .candidates()
                            .into_iter()
                            .zip(partner)
                            .map(|(a, b)| vec![(first, a), (second, b)])
                            .collect(),
                    );
                }
                Some((_, second)) if pos == second => {}
                _ => axes.push(
                    param
                        .kind
                        .candidates()
                        .into_iter()
                        .map(|v| vec![(pos, v)])
                        .collect(),
                ),
            }
        }
        axes
    }

    /// Number of parameter sets, or `None` if it overflows `usize`.
    pub fn grid_size(&self) -> Option<usize> {
        self.axes()
            .iter()
            .try_fold(1usize, |total, axis| total.checked_mul(axis.len()))
    }

    /// Materialize every parameter set, in grid order.
    pub fn expand(&self) -> Vec<ParameterSet> {
        let width = self.space.len();
        let mut partial: Vec<Vec<Option<ParameterValue>>> = vec![vec![None; width]];

        for axis in self.axes() {
            let mut next = Vec::with_capacity(partial.len() * axis.len());
            for existing in &partial {
                for option in &axis {
                    let mut combo = existing.clone();
                    for (pos, value) in option {
                        combo[*pos] = Some(value.clone());
                    }
                    next.push(combo);
                }
            }
            partial = next;
        }

        partial
            .into_iter()
            .map(|values| {
                self.space
                    .parameters
                    .iter()
                    .zip(values)
                    .filter_map(|(def, value)| value.map(|v| (def.name.clone(), v)))
                    .collect()
            })
            .collect()
    }
}

fn overlap_error(key: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name: key.to_string(),
        message: "cannot be both the pass-through key and a coupled key".to_string(),
    }
}

/// Expand a YAML parameter mapping into parameter sets.
pub fn expand_grid(
    params: &serde_yaml::Mapping,
    pass_through: Option<&str>,
    coupled: Option<(&str, &str)>,
) -> Result<Vec<ParameterSet>, ConfigError> {
    let mut grid = GridSearch::new(SearchSpace::from_yaml(params)?);
    if let Some(key) = pass_through {
        grid = grid.with_pass_through(key)?;
    }
    if let Some((first, second)) = coupled {
        grid = grid.with_coupled(first, second)?;
    }
    Ok(grid.expand())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<ParameterValue> {
        values.iter().map(|v| ParameterValue::Int(*v)).collect()
    }

    fn yaml(text: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn scalar_contributes_one_value() {
        let space = SearchSpace::new()
            .add_choice("a", ints(&[1, 2]))
            .add_fixed("b", 3i64);
        let sets = GridSearch::new(space).expand();

        assert_eq!(
            sets,
            vec![
                ParameterSet::new().with("a", 1i64).with("b", 3i64),
                ParameterSet::new().with("a", 2i64).with("b", 3i64),
            ]
        );
    }

    #[test]
    fn first_key_varies_slowest() {
        let space = SearchSpace::new()
            .add_choice("a", ints(&[1, 2]))
            .add_choice("b", ints(&[10, 20, 30]));
        let grid = GridSearch::new(space);
        assert_eq!(grid.grid_size(), Some(6));

        let pairs: Vec<(i64, i64)> = grid
            .expand()
            .iter()
            .map(|s| (s.get("a").unwrap().as_i64().unwrap(), s.get("b").unwrap().as_i64().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1, 10), (1, 20), (1, 30), (2, 10), (2, 20), (2, 30)]
        );
    }

    #[test]
    fn size_is_product_of_axis_lengths() {
        let sets = expand_grid(
            &yaml("a: [1, 2, 3]\nb: [x, y]\nc: 0.5\nd: [true, false]\n"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(sets.len(), 12);
        assert!(sets.iter().all(|s| s.keys().collect::<Vec<_>>() == vec!["a", "b", "c", "d"]));
    }

    #[test]
    fn fully_scalar_input_gives_one_set() {
        let sets = expand_grid(&yaml("lr: 0.001\nepochs: 10\n"), None, None).unwrap();
        assert_eq!(sets.len(), 1);
    }

    #[test]
    fn empty_sequence_gives_no_sets() {
        let grid = GridSearch::new(SearchSpace::from_yaml(&yaml("a: [1, 2]\nb: []\n")).unwrap());
        assert_eq!(grid.grid_size(), Some(0));
        assert!(grid.expand().is_empty());
    }

    #[test]
    fn pass_through_is_copied_intact() {
        let sets = expand_grid(
            &yaml("a: [1, 2]\nlayers: [64, 32]\nb: [x, y]\n"),
            Some("layers"),
            None,
        )
        .unwrap();
        assert_eq!(sets.len(), 4);
        let expected = ParameterValue::List(ints(&[64, 32]));
        assert!(sets.iter().all(|s| s.get("layers") == Some(&expected)));
    }

    #[test]
    fn pass_through_cannot_be_a_coupled_key() {
        let space = || {
            SearchSpace::new()
                .add_choice("a", ints(&[1, 2]))
                .add_choice("b", ints(&[10, 20]))
        };

        let err = GridSearch::new(space())
            .with_pass_through("a")
            .unwrap()
            .with_coupled("a", "b")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { ref name, .. } if name == "a"));

        let err = GridSearch::new(space())
            .with_coupled("a", "b")
            .unwrap()
            .with_pass_through("b")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { ref name, .. } if name == "b"));

        assert!(expand_grid(&yaml("a: [1, 2]\nb: [10, 20]\n"), Some("a"), Some(("a", "b"))).is_err());
    }

    #[test]
    fn pass_through_beside_a_coupled_pair() {
        let sets = expand_grid(
            &yaml("a: [1, 2]\nlayers: [64, 32]\nb: [10, 20]\n"),
            Some("layers"),
            Some(("a", "b")),
        )
        .unwrap();
        assert_eq!(sets.len(), 2);
        for set in &sets {
            assert_eq!(set.keys().collect::<Vec<_>>(), vec!["a", "layers", "b"]);
            assert_eq!(set.get("layers"), Some(&ParameterValue::List(ints(&[64, 32]))));
        }
    }

    #[test]
    fn nested_lists_are_candidates() {
        let sets = expand_grid(&yaml("repr_model: [[64, 32], [128]]\n"), None, None).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1].get("repr_model"), Some(&ParameterValue::List(ints(&[128]))));
    }

    #[test]
    fn coupled_pair_is_zipped() {
        let space = SearchSpace::new()
            .add_choice("a", ints(&[1, 2]))
            .add_choice("b", ints(&[10, 20]));
        let sets = GridSearch::new(space).with_coupled("a", "b").unwrap().expand();

        assert_eq!(
            sets,
            vec![
                ParameterSet::new().with("a", 1i64).with("b", 10i64),
                ParameterSet::new().with("a", 2i64).with("b", 20i64),
            ]
        );
    }

    #[test]
    fn coupled_axis_sits_at_first_key_and_keeps_positions() {
        let space = SearchSpace::new()
            .add_choice("x", ints(&[7, 8]))
            .add_choice("a", ints(&[1, 2]))
            .add_choice("y", ints(&[0, 5]))
            .add_choice("b", ints(&[10, 20]));
        let grid = GridSearch::new(space).with_coupled("a", "b").unwrap();
        assert_eq!(grid.grid_size(), Some(8));

        let sets = grid.expand();
        assert_eq!(sets.len(), 8);
        for set in &sets {
            assert_eq!(set.keys().collect::<Vec<_>>(), vec!["x", "a", "y", "b"]);
            let a = set.get("a").unwrap().as_i64().unwrap();
            let b = set.get("b").unwrap().as_i64().unwrap();
            assert_eq!(b, a * 10);
        }
        // Order: x slowest, then the zipped (a, b) axis, then y.
        let triples: Vec<(i64, i64, i64)> = sets
            .iter()
            .take(4)
            .map(|s| {
                (
                    s.get("x").unwrap().as_i64().unwrap(),
                    s.get("a").unwrap().as_i64().unwrap(),
                    s.get("y").unwrap().as_i64().unwrap(),
                )
            })
            .collect();
        assert_eq!(triples, vec![(7, 1, 0), (7, 1, 5), (7, 2, 0), (7, 2, 5)]);
    }

    #[test]
    fn coupled_scalar_is_one_element_sequence() {
        let space = SearchSpace::new()
            .add_fixed("a", 1i64)
            .add_choice("b", ints(&[10]));
        let sets = GridSearch::new(space).with_coupled("a", "b").unwrap().expand();
        assert_eq!(sets, vec![ParameterSet::new().with("a", 1i64).with("b", 10i64)]);
    }

    #[test]
    fn coupled_length_mismatch_is_rejected() {
        let space = SearchSpace::new()
            .add_choice("a", ints(&[1, 2]))
            .add_choice("b", ints(&[10, 20, 30]));
        let err = GridSearch::new(space).with_coupled("a", "b").unwrap_err();
        assert_eq!(
            err,
            ConfigError::LengthMismatch {
                first: "a".into(),
                second: "b".into(),
                first_len: 2,
                second_len: 3,
            }
        );
    }

    #[test]
    fn coupled_key_must_exist() {
        let space = SearchSpace::new().add_choice("a", ints(&[1, 2]));
        assert!(matches!(
            GridSearch::new(space).with_coupled("a", "missing"),
            Err(ConfigError::CoupledKeyMissing { .. })
        ));
    }

    #[test]
    fn yaml_keeps_source_order_and_rejects_nulls() {
        let space = SearchSpace::from_yaml(&yaml("zeta: 1\nalpha: [1, 2]\nmid: x\n")).unwrap();
        let names: Vec<&str> = space.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        assert!(SearchSpace::from_yaml(&yaml("a: ~\n")).is_err());
    }
}
