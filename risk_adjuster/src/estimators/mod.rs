//! The closed set of estimator families the ensemble chooses from.

pub mod boosting;
pub mod linear;
pub mod tweedie;

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::{RiskError, RiskResult};

use self::boosting::{BoostingParams, GradientBoostedTrees};
use self::linear::LinearModel;
use self::tweedie::{TweedieModel, TweedieParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorFamily {
    Baseline,
    Linear,
    Tweedie,
    GradientBoosting,
}

impl EstimatorFamily {
    pub const ALL: [EstimatorFamily; 4] = [
        EstimatorFamily::Baseline,
        EstimatorFamily::Linear,
        EstimatorFamily::Tweedie,
        EstimatorFamily::GradientBoosting,
    ];

    /// Lower is simpler; used to break near-ties in favour of lower variance.
    pub fn complexity(&self) -> u8 {
        match self {
            EstimatorFamily::Baseline => 0,
            EstimatorFamily::Linear => 1,
            EstimatorFamily::Tweedie => 2,
            EstimatorFamily::GradientBoosting => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EstimatorFamily::Baseline => "baseline",
            EstimatorFamily::Linear => "linear",
            EstimatorFamily::Tweedie => "tweedie_glm",
            EstimatorFamily::GradientBoosting => "gradient_boosting",
        }
    }
}

impl fmt::Display for EstimatorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// L2 penalty of the linear family, on standardised features.
    pub ridge_lambda: f64,
    pub tweedie: TweedieParams,
    pub boosting: BoostingParams,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            ridge_lambda: 1e-6,
            tweedie: TweedieParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

/// Per-column z-score parameters captured at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
}

impl Standardizer {
    pub fn fit(x: &ArrayView2<f64>) -> Self {
        let mut means = Array1::<f64>::zeros(x.ncols());
        let mut stds = Array1::<f64>::ones(x.ncols());
        for (j, col) in x.axis_iter(Axis(1)).enumerate() {
            if col.len() < 2 {
                if !col.is_empty() {
                    means[j] = col[0];
                }
                continue;
            }
            means[j] = col.iter().mean();
            let std = col.iter().std_dev();
            // constant columns are only centred
            stds[j] = if std.is_finite() && std > 1e-9 { std } else { 1.0 };
        }
        Self { means, stds }
    }

    pub fn transform(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        (x - &self.means) / &self.stds
    }
}

/// Fitted state of one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedEstimator {
    Baseline { mean: f64, n_features: usize },
    Linear(LinearModel),
    Tweedie(TweedieModel),
    GradientBoosting(GradientBoostedTrees),
}

impl FittedEstimator {
    pub fn fit(
        family: EstimatorFamily,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        params: &EstimatorParams,
    ) -> RiskResult<Self> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(RiskError::Numerical(format!(
                "cannot fit {} on {} rows and {} targets",
                family,
                x.nrows(),
                y.len()
            )));
        }
        Ok(match family {
            EstimatorFamily::Baseline => FittedEstimator::Baseline {
                mean: y.iter().mean(),
                n_features: x.ncols(),
            },
            EstimatorFamily::Linear => {
                FittedEstimator::Linear(LinearModel::fit(x, y, params.ridge_lambda)?)
            }
            EstimatorFamily::Tweedie => {
                FittedEstimator::Tweedie(TweedieModel::fit(x, y, &params.tweedie)?)
            }
            EstimatorFamily::GradientBoosting => {
                FittedEstimator::GradientBoosting(GradientBoostedTrees::fit(x, y, &params.boosting))
            }
        })
    }

    pub fn family(&self) -> EstimatorFamily {
        match self {
            FittedEstimator::Baseline { .. } => EstimatorFamily::Baseline,
            FittedEstimator::Linear(_) => EstimatorFamily::Linear,
            FittedEstimator::Tweedie(_) => EstimatorFamily::Tweedie,
            FittedEstimator::GradientBoosting(_) => EstimatorFamily::GradientBoosting,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            FittedEstimator::Baseline { n_features, .. } => *n_features,
            FittedEstimator::Linear(m) => m.coefficients.len(),
            FittedEstimator::Tweedie(m) => m.coefficients.len(),
            FittedEstimator::GradientBoosting(m) => m.n_features,
        }
    }

    /// Raw model output, one value per row.
    pub fn predict(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        match self {
            FittedEstimator::Baseline { mean, .. } => Array1::from_elem(x.nrows(), *mean),
            FittedEstimator::Linear(m) => m.predict(x),
            FittedEstimator::Tweedie(m) => m.predict(x),
            FittedEstimator::GradientBoosting(m) => m.predict(x),
        }
    }

    /// Native importances normalised to sum 1; all zero when the model ignores its inputs.
    pub fn feature_importance(&self) -> Array1<f64> {
        let raw = match self {
            FittedEstimator::Baseline { n_features, .. } => Array1::zeros(*n_features),
            FittedEstimator::Linear(m) => m.coefficients.mapv(f64::abs),
            FittedEstimator::Tweedie(m) => m.coefficients.mapv(f64::abs),
            FittedEstimator::GradientBoosting(m) => m.split_gains.clone(),
        };
        normalise(raw)
    }
}

fn normalise(mut v: Array1<f64>) -> Array1<f64> {
    v.mapv_inplace(|x| if x.is_finite() { x.max(0.0) } else { 0.0 });
    let total = v.sum();
    if total > 0.0 {
        v /= total;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardizer_handles_constant_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]];
        let s = Standardizer::fit(&x.view());
        assert!((s.means[0] - 3.0).abs() < 1e-12);
        assert!((s.stds[0] - 2.0).abs() < 1e-12);
        assert_eq!(s.stds[1], 1.0);
        let z = s.transform(&array![[7.0, 6.0]].view());
        assert!((z[[0, 0]] - 2.0).abs() < 1e-12);
        assert!((z[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn importances_are_normalised() {
        let x = array![
            [0.0, 1.0],
            [1.0, 0.0],
            [2.0, 1.0],
            [3.0, 0.0],
            [4.0, 1.0],
            [5.0, 0.0],
            [6.0, 1.0],
            [7.0, 0.0]
        ];
        let y = array![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0];
        for family in EstimatorFamily::ALL {
            let fitted = FittedEstimator::fit(family, &x.view(), &y.view(), &EstimatorParams::default()).unwrap();
            let imp = fitted.feature_importance();
            assert!(imp.iter().all(|&v| v >= 0.0));
            let total = imp.sum();
            if family == EstimatorFamily::Baseline {
                assert_eq!(total, 0.0);
            } else {
                assert!((total - 1.0).abs() < 1e-9, "{} sums to {}", family, total);
            }
        }
    }

    #[test]
    fn complexity_orders_families() {
        let mut families = EstimatorFamily::ALL.to_vec();
        families.sort_by_key(|f| f.complexity());
        assert_eq!(families, EstimatorFamily::ALL.to_vec());
    }
}
