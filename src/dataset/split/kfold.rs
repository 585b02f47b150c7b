//! Grouped stratified k-fold assignment.
//!
//! Groups are placed greedily, most label-skewed first, into the fold that
//! keeps per-label proportions closest to uniform across folds. Every member
//! of a group lands in the same fold.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::SplitError;

const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;

/// Grouped stratified k-fold splitter.
#[derive(Debug, Clone)]
pub struct StratifiedGroupKFold {
    n_splits: usize,
    shuffle_seed: Option<String>,
}

impl StratifiedGroupKFold {
    pub fn new(n_splits: usize) -> Result<Self, SplitError> {
        if n_splits < 2 {
            return Err(SplitError::TooFewSplits(n_splits));
        }
        Ok(Self {
            n_splits,
            shuffle_seed: None,
        })
    }

    /// Shuffle group order before placement, seeded from `seed`.
    pub fn with_shuffle(mut self, seed: &str) -> Self {
        self.shuffle_seed = Some(seed.to_string());
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Fold index in `[0, n_splits)` for every sample.
    pub fn assign<Y: Ord, G: Ord>(&self, labels: &[Y], groups: &[G]) -> Result<Vec<usize>, SplitError> {
        if labels.len() != groups.len() {
            return Err(SplitError::LengthMismatch {
                labels: labels.len(),
                groups: groups.len(),
            });
        }
        let n_samples = labels.len();
        if n_samples < self.n_splits {
            tracing::warn!(
                n_splits = self.n_splits,
                n_samples,
                "fewer samples than folds; some folds will be empty"
            );
        }

        let (label_inv, label_counts) = dense_index(labels);
        let (group_inv, group_counts) = dense_index(groups);
        let n_labels = label_counts.len();
        if let Some(smallest) = label_counts.iter().min() {
            if *smallest < self.n_splits {
                tracing::warn!(
                    n_splits = self.n_splits,
                    smallest_label_count = *smallest,
                    "least populated label has fewer members than folds"
                );
            }
        }

        let mut counts_per_group = vec![vec![0.0f64; n_labels]; group_counts.len()];
        for (label, group) in label_inv.iter().zip(&group_inv) {
            counts_per_group[*group][*label] += 1.0;
        }
        let label_totals: Vec<f64> = label_counts.iter().map(|c| *c as f64).collect();

        let mut order: Vec<usize> = (0..counts_per_group.len()).collect();
        if let Some(seed) = &self.shuffle_seed {
            order.shuffle(&mut seeded_rng(seed));
        }
        let spread: Vec<f64> = counts_per_group.iter().map(|row| std_dev(row)).collect();
        order.sort_by(|a, b| spread[*b].total_cmp(&spread[*a]));

        let mut counts_per_fold = vec![vec![0.0f64; n_labels]; self.n_splits];
        let mut fold_of_group = vec![0usize; counts_per_group.len()];
        for group in order {
            let fold = best_fold(&mut counts_per_fold, &label_totals, &counts_per_group[group]);
            for (slot, count) in counts_per_fold[fold].iter_mut().zip(&counts_per_group[group]) {
                *slot += count;
            }
            fold_of_group[group] = fold;
        }

        Ok(group_inv.iter().map(|group| fold_of_group[*group]).collect())
    }

    /// Test indices per fold, each ascending.
    pub fn split<Y: Ord, G: Ord>(&self, labels: &[Y], groups: &[G]) -> Result<Vec<Vec<usize>>, SplitError> {
        let folds = self.assign(labels, groups)?;
        let mut out = vec![Vec::new(); self.n_splits];
        for (idx, fold) in folds.into_iter().enumerate() {
            out[fold].push(idx);
        }
        Ok(out)
    }
}

/// Map each value to the rank of its distinct value; also return per-rank counts.
fn dense_index<T: Ord>(values: &[T]) -> (Vec<usize>, Vec<usize>) {
    let mut ranks: BTreeMap<&T, usize> = values.iter().map(|v| (v, 0)).collect();
    for (rank, slot) in ranks.values_mut().enumerate() {
        *slot = rank;
    }
    let mut counts = vec![0usize; ranks.len()];
    let inverse = values
        .iter()
        .map(|v| {
            let rank = ranks[v];
            counts[rank] += 1;
            rank
        })
        .collect();
    (inverse, counts)
}

fn best_fold(counts_per_fold: &mut [Vec<f64>], label_totals: &[f64], group_counts: &[f64]) -> usize {
    let mut best: Option<(usize, f64, f64)> = None;
    for fold in 0..counts_per_fold.len() {
        add_row(&mut counts_per_fold[fold], group_counts, 1.0);
        let score = imbalance(counts_per_fold, label_totals);
        add_row(&mut counts_per_fold[fold], group_counts, -1.0);
        let samples: f64 = counts_per_fold[fold].iter().sum();
        let better = match best {
            None => true,
            Some((_, best_score, best_samples)) => {
                score < best_score || (is_close(score, best_score) && samples < best_samples)
            }
        };
        if better {
            best = Some((fold, score, samples));
        }
    }
    best.map_or(0, |(fold, _, _)| fold)
}

/// Mean over labels of the across-fold spread of each label's share.
fn imbalance(counts_per_fold: &[Vec<f64>], label_totals: &[f64]) -> f64 {
    if label_totals.is_empty() {
        return 0.0;
    }
    let total: f64 = label_totals
        .iter()
        .enumerate()
        .map(|(label, denom)| {
            let shares: Vec<f64> = counts_per_fold.iter().map(|fold| fold[label] / denom).collect();
            std_dev(&shares)
        })
        .sum();
    total / label_totals.len() as f64
}

fn add_row(row: &mut [f64], other: &[f64], sign: f64) {
    for (slot, value) in row.iter_mut().zip(other) {
        *slot += sign * value;
    }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt()
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

fn seeded_rng(seed: &str) -> StdRng {
    let hash = blake3::hash(seed.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(hash.as_bytes());
    StdRng::from_seed(bytes)
}
