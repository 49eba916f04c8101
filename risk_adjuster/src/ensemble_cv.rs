//! ensemble_cv.rs – k-fold model selection over the estimator families (held-out R²)

use std::collections::BTreeMap;

use log::{info, warn};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SelectionConfig;
use crate::estimators::{EstimatorFamily, FittedEstimator};
use crate::helper_functions::r2_score;
use crate::models::{RiskError, RiskResult};

/// Outcome of one selection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvMetrics {
    pub best_family: EstimatorFamily,
    /// Mean held-out R² of the winner; never negative because the baseline always competes.
    pub mean_r2: f64,
    /// Best single-fold R² of the winner.
    pub best_r2: f64,
    pub n_folds: usize,
    /// Held-out R² of the winner, fold by fold.
    pub fold_scores: Vec<f64>,
    /// Mean held-out R² of every candidate that fitted on all folds, keyed by family name.
    pub candidate_scores: BTreeMap<String, f64>,
}

struct CandidateScore {
    family: EstimatorFamily,
    folds: Vec<f64>,
    mean: f64,
}

// ───────── helpers ─────────

/// Requested fold count, shrunk so each held-out fold keeps `min_fold_size` rows. Never below 2.
pub fn effective_folds(n_samples: usize, config: &SelectionConfig) -> usize {
    let by_size = n_samples / config.min_fold_size.max(1);
    config.n_folds.min(by_size).max(2)
}

/// Shuffled `(train, test)` index pairs; row `order[i]` is held out in fold `i % k`.
pub fn fold_indices(n_samples: usize, n_folds: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut order: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    (0..n_folds)
        .map(|f| {
            let test_idx: Vec<usize> = order
                .iter()
                .enumerate()
                .filter(|(i, _)| i % n_folds == f)
                .map(|(_, &row)| row)
                .collect();
            let train_idx: Vec<usize> = order
                .iter()
                .enumerate()
                .filter(|(i, _)| i % n_folds != f)
                .map(|(_, &row)| row)
                .collect();
            (train_idx, test_idx)
        })
        .collect()
}

fn score_candidate(
    family: EstimatorFamily,
    x: &ArrayView2<f64>,
    y: &ArrayView1<f64>,
    folds: &[(Vec<usize>, Vec<usize>)],
    config: &SelectionConfig,
) -> RiskResult<Vec<f64>> {
    if family == EstimatorFamily::Baseline {
        // a constant predictor has no skill by definition
        return Ok(vec![0.0; folds.len()]);
    }
    folds
        .iter()
        .map(|(train_idx, test_idx)| {
            let x_train = x.select(Axis(0), train_idx);
            let y_train = y.select(Axis(0), train_idx);
            let model = FittedEstimator::fit(family, &x_train.view(), &y_train.view(), &config.estimators)?;

            let pred = model.predict(&x.select(Axis(0), test_idx).view());
            if pred.iter().any(|p| !p.is_finite()) {
                return Err(RiskError::Numerical(format!("{} produced non-finite predictions", family)));
            }
            let y_test = y.select(Axis(0), test_idx);
            Ok(r2_score(&y_test.to_vec(), &pred.to_vec()))
        })
        .collect()
}

/// Within `tie_epsilon` of the best mean, the simplest family wins.
fn pick_winner(scores: &[CandidateScore], tie_epsilon: f64) -> Option<&CandidateScore> {
    let best_mean = scores
        .iter()
        .map(|c| c.mean)
        .fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .filter(|c| c.mean >= best_mean - tie_epsilon)
        .min_by_key(|c| c.family.complexity())
}

// ───────── public API ─────────

/// Scores every configured family with k-fold CV, then refits the winner on all rows.
pub fn select_and_fit(
    x: &ArrayView2<f64>,
    y: &ArrayView1<f64>,
    config: &SelectionConfig,
) -> RiskResult<(FittedEstimator, CvMetrics)> {
    let n = x.nrows();
    let required = config.min_samples.max(4);
    if n < required {
        return Err(RiskError::InsufficientData { found: n, required });
    }
    if y.len() != n {
        return Err(RiskError::Numerical(format!(
            "{} feature rows but {} targets",
            n,
            y.len()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(RiskError::Numerical("target contains non-finite values".into()));
    }

    let n_folds = effective_folds(n, config);
    let folds = fold_indices(n, n_folds, config.seed);
    info!(
        "=== Model selection: {} rows, {} features, {}-fold CV ===",
        n,
        x.ncols(),
        n_folds
    );

    let mut families = vec![EstimatorFamily::Baseline];
    for &family in &config.candidates {
        if !families.contains(&family) {
            families.push(family);
        }
    }

    let mut scores = Vec::with_capacity(families.len());
    for family in families {
        match score_candidate(family, x, y, &folds, config) {
            Ok(folds) => {
                let mean = folds.iter().sum::<f64>() / folds.len() as f64;
                info!("{:<20} mean R² = {:>9.6}", family.name(), mean);
                scores.push(CandidateScore { family, folds, mean });
            }
            Err(e) => warn!("{} skipped: {}", family, e),
        }
    }

    let winner = pick_winner(&scores, config.tie_epsilon)
        .ok_or_else(|| RiskError::Numerical("no candidate could be fitted".into()))?;
    let best_r2 = winner.folds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    info!(
        "Selected {} (mean R² {:.6}, best fold {:.6})",
        winner.family, winner.mean, best_r2
    );

    let model = FittedEstimator::fit(winner.family, x, y, &config.estimators)?;
    let metrics = CvMetrics {
        best_family: winner.family,
        mean_r2: winner.mean,
        best_r2,
        n_folds,
        fold_scores: winner.folds.clone(),
        candidate_scores: scores
            .iter()
            .map(|c| (c.family.name().to_string(), c.mean))
            .collect(),
    };
    Ok((model, metrics))
}
