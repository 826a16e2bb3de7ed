//! Stratification on a continuous target: equal-frequency bins and k-fold assignment.

use std::collections::BTreeMap;

use ms_types::{BinningError, ConfigError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

/// Seed used for fold shuffling unless overridden.
pub const DEFAULT_FOLD_SEED: u64 = 42;

/// Linearly interpolated quantile of already sorted values, `q` in `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
    }
}

/// Edges of `bins` equal-frequency intervals: `bins + 1` strictly increasing values.
pub fn quantile_edges(values: &[f64], bins: usize) -> Result<Vec<f64>, BinningError> {
    if bins == 0 {
        return Err(BinningError::ZeroBins);
    }
    if values.is_empty() {
        return Err(BinningError::NoValues);
    }
    if let Some(value) = values.iter().find(|v| !v.is_finite()) {
        return Err(BinningError::NonFinite { value: *value });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut distinct = sorted.clone();
    distinct.dedup();
    if bins > distinct.len() {
        return Err(BinningError::TooManyBins {
            bins,
            distinct: distinct.len(),
        });
    }

    let edges: Vec<f64> = (0..=bins)
        .map(|j| quantile_sorted(&sorted, j as f64 / bins as f64))
        .collect();
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(BinningError::DuplicateEdges { bins });
    }
    Ok(edges)
}

/// Assign each value an equal-frequency bin label in `0..bins`.
///
/// Intervals are closed on the right; the first interval also includes the
/// minimum.
pub fn quantile_bins(values: &[f64], bins: usize) -> Result<Vec<usize>, BinningError> {
    let edges = quantile_edges(values, bins)?;
    let upper = &edges[1..];
    Ok(values
        .iter()
        .map(|v| upper.partition_point(|e| e < v).min(bins - 1))
        .collect())
}

/// One fold: sorted positions used for training and for validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
}

/// Stratified k-fold assignment over discrete labels.
#[derive(Debug, Clone)]
pub struct StratifiedKFold {
    n_splits: usize,
    seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            seed: DEFAULT_FOLD_SEED,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Members of each label are shuffled and dealt round-robin across folds,
    /// label by label, so every fold gets a near-equal share of every label
    /// and fold sizes differ by at most one.
    pub fn split(&self, labels: &[usize]) -> Result<Vec<Fold>, ConfigError> {
        let n = labels.len();
        let k = self.n_splits;
        if k < 2 || k > n {
            return Err(ConfigError::InvalidFoldCount {
                folds: k,
                samples: n,
            });
        }

        let mut by_label: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            by_label.entry(*label).or_default().push(i);
        }
        if let Some(smallest) = by_label.values().map(Vec::len).min() {
            if smallest < k {
                warn!(
                    "The least populated stratum has {} members, fewer than the {} folds",
                    smallest, k
                );
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut fold_of = vec![0usize; n];
        let mut position = 0usize;
        for members in by_label.values_mut() {
            members.shuffle(&mut rng);
            for &i in members.iter() {
                fold_of[i] = position % k;
                position += 1;
            }
        }

        Ok((0..k)
            .map(|f| {
                let (valid, train): (Vec<usize>, Vec<usize>) =
                    (0..n).partition(|i| fold_of[*i] == f);
                Fold { train, valid }
            })
            .collect())
    }
}
