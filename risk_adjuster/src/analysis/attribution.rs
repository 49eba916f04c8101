//! attribution.rs – sampled Shapley values for any fitted estimator
//!
//! Every sampled ordering walks each background row from its own values to the
//! explained record one feature at a time, crediting each step's change in model
//! output to the feature that moved. The steps telescope, so a record's
//! contributions sum to `f(record) − mean f(background)` up to rounding.

use std::collections::BTreeMap;

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::estimators::FittedEstimator;
use crate::models::{schema_err, RiskResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAttribution {
    pub member_id: Option<String>,
    pub predicted: f64,
    pub baseline: f64,
    pub contributions: BTreeMap<String, f64>,
}

impl RecordAttribution {
    pub fn total_contribution(&self) -> f64 {
        self.contributions.values().sum()
    }
}

/// Seeded shuffle of the training rows, truncated to `size`.
pub fn sample_background(x: &ArrayView2<f64>, size: usize, seed: u64) -> Array2<f64> {
    let mut rows: Vec<usize> = (0..x.nrows()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);
    rows.truncate(size.max(1));
    x.select(Axis(0), &rows)
}

pub struct ShapleyExplainer<'a> {
    model: &'a FittedEstimator,
    background: &'a Array2<f64>,
    features: &'a [String],
    orderings: Vec<Vec<usize>>,
    baseline: f64,
}

impl<'a> ShapleyExplainer<'a> {
    /// `permutations` is rounded up to an even count; each sampled ordering is
    /// paired with its reverse. One ordering set is shared by every record, so a
    /// record's attribution does not depend on its position in the batch.
    pub fn new(
        model: &'a FittedEstimator,
        background: &'a Array2<f64>,
        features: &'a [String],
        permutations: usize,
        seed: u64,
    ) -> RiskResult<Self> {
        if background.nrows() == 0 {
            return Err(schema_err("attribution needs a non-empty background sample"));
        }
        if background.ncols() != features.len() || model.n_features() != features.len() {
            return Err(schema_err(format!(
                "model has {} features, background {}, names {}",
                model.n_features(),
                background.ncols(),
                features.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let pairs = permutations.div_ceil(2).max(1);
        let mut orderings = Vec::with_capacity(2 * pairs);
        for _ in 0..pairs {
            let mut order: Vec<usize> = (0..features.len()).collect();
            order.shuffle(&mut rng);
            let reversed: Vec<usize> = order.iter().rev().copied().collect();
            orderings.push(order);
            orderings.push(reversed);
        }

        let baseline = model.predict(&background.view()).mean().unwrap_or(0.0);
        debug!(
            "shapley explainer: {} orderings over {} background rows, baseline {:.4}",
            orderings.len(),
            background.nrows(),
            baseline
        );
        Ok(Self {
            model,
            background,
            features,
            orderings,
            baseline,
        })
    }

    /// Mean model output over the background population.
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn explain(&self, row: &ArrayView1<f64>) -> RiskResult<RecordAttribution> {
        if row.len() != self.features.len() {
            return Err(schema_err(format!(
                "record has {} features, model expects {}",
                row.len(),
                self.features.len()
            )));
        }
        let mut phi = Array1::<f64>::zeros(self.features.len());
        for order in &self.orderings {
            let mut z = self.background.clone();
            let mut prev = self.model.predict(&z.view());
            for &j in order {
                z.column_mut(j).fill(row[j]);
                let cur = self.model.predict(&z.view());
                phi[j] += (&cur - &prev).sum();
                prev = cur;
            }
        }
        phi /= (self.orderings.len() * self.background.nrows()) as f64;

        let predicted = self.model.predict(&row.view().insert_axis(Axis(0)))[0];
        Ok(RecordAttribution {
            member_id: None,
            predicted,
            baseline: self.baseline,
            contributions: self.features.iter().cloned().zip(phi.iter().copied()).collect(),
        })
    }

    pub fn explain_all(&self, x: &ArrayView2<f64>) -> RiskResult<Vec<RecordAttribution>> {
        x.outer_iter().map(|row| self.explain(&row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::{EstimatorFamily, EstimatorParams};
    use ndarray::array;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn training_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((24, 3), |(i, j)| ((i * (j + 3)) % 7) as f64 + j as f64);
        let y = x
            .outer_iter()
            .map(|r| 4.0 * r[0] + 2.0 * r[1] + r[0] * r[2])
            .collect();
        (x, y)
    }

    #[test]
    fn linear_model_contributions_match_centred_coefficients() {
        let (x, _) = training_data();
        let y: Array1<f64> = x.outer_iter().map(|r| 3.0 * r[0] - r[2]).collect();
        let model = FittedEstimator::fit(EstimatorFamily::Linear, &x.view(), &y.view(), &EstimatorParams::default()).unwrap();
        let features = names(3);
        let explainer = ShapleyExplainer::new(&model, &x, &features, 8, 7).unwrap();

        let row = array![6.0, 2.0, 1.0];
        let attr = explainer.explain(&row.view()).unwrap();
        let means = x.mean_axis(Axis(0)).unwrap();
        // additive model: φ_j = w_j (x_j − E[x_j]) regardless of ordering
        assert!((attr.contributions["f0"] - 3.0 * (6.0 - means[0])).abs() < 1e-3);
        assert!(attr.contributions["f1"].abs() < 1e-3);
        assert!((attr.contributions["f2"] + (1.0 - means[2])).abs() < 1e-3);
    }

    #[test]
    fn contributions_sum_to_prediction_minus_baseline() {
        let (x, y) = training_data();
        let features = names(3);
        for family in [EstimatorFamily::Linear, EstimatorFamily::Tweedie, EstimatorFamily::GradientBoosting] {
            let model = FittedEstimator::fit(family, &x.view(), &y.view(), &EstimatorParams::default()).unwrap();
            let background = sample_background(&x.view(), 10, 1);
            let explainer = ShapleyExplainer::new(&model, &background, &features, 6, 3).unwrap();
            for attr in explainer.explain_all(&x.view()).unwrap() {
                let gap = attr.predicted - attr.baseline;
                let tol = 1e-3 * gap.abs().max(1.0);
                assert!((attr.total_contribution() - gap).abs() < tol, "{}: {} vs {}", family, attr.total_contribution(), gap);
            }
        }
    }

    #[test]
    fn attribution_is_repeatable() {
        let (x, y) = training_data();
        let model = FittedEstimator::fit(EstimatorFamily::GradientBoosting, &x.view(), &y.view(), &EstimatorParams::default()).unwrap();
        let features = names(3);
        let a = ShapleyExplainer::new(&model, &x, &features, 4, 11).unwrap();
        let b = ShapleyExplainer::new(&model, &x, &features, 4, 11).unwrap();
        let row = x.row(5);
        assert_eq!(a.explain(&row).unwrap(), b.explain(&row).unwrap());
    }

    #[test]
    fn rejects_mismatched_widths() {
        let (x, y) = training_data();
        let model = FittedEstimator::fit(EstimatorFamily::Linear, &x.view(), &y.view(), &EstimatorParams::default()).unwrap();
        assert!(ShapleyExplainer::new(&model, &x, &names(2), 4, 0).is_err());
        let features = names(3);
        let explainer = ShapleyExplainer::new(&model, &x, &features, 4, 0).unwrap();
        assert!(explainer.explain(&array![1.0, 2.0].view()).is_err());
    }
}
