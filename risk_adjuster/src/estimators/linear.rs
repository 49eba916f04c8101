//! linear.rs - ridge-stabilised least squares on standardised features
//!
//! The penalty only exists to keep `XᵀX` invertible when engineered columns are
//! collinear (e.g. total vs. per-tier condition counts); keep it tiny.

use linfa_linalg::cholesky::InverseC;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::estimators::Standardizer;
use crate::models::{RiskError, RiskResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub standardizer: Standardizer,
    pub intercept: f64,
    /// Weights on z-scored columns, so magnitudes are comparable.
    pub coefficients: Array1<f64>,
}

//───────────────────────────────── helpers ─────────────────────────────────//

/// Ridge‑regularised closed‑form solution:  `w = (XᵀX + λI)⁻¹ Xᵀy`.
pub(crate) fn ridge_ols(
    x: &Array2<f64>,
    y: &Array1<f64>,
    lambda: f64,
) -> RiskResult<Array1<f64>> {
    let mut xtx = x.t().dot(x);
    // add λI to the diagonal
    for i in 0..xtx.nrows() {
        xtx[[i, i]] += lambda;
    }
    let xtx_inv = xtx.invc()?;
    let coeffs = xtx_inv.dot(&x.t().dot(y));
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(RiskError::Numerical("ridge solution is not finite".into()));
    }
    Ok(coeffs)
}

//───────────────────────────── Training ────────────────────────────//

impl LinearModel {
    pub fn fit(x: &ArrayView2<f64>, y: &ArrayView1<f64>, lambda: f64) -> RiskResult<Self> {
        let standardizer = Standardizer::fit(x);
        let z = standardizer.transform(x);
        let intercept = y.iter().mean();
        let centred = y.mapv(|v| v - intercept);

        // scale with n so the penalty means the same thing for any batch size
        let penalty = lambda.max(f64::EPSILON) * x.nrows() as f64;
        let coefficients = ridge_ols(&z, &centred, penalty)?;
        debug!("linear fit: intercept {:.6}, coefficients {:?}", intercept, coefficients);

        Ok(Self {
            standardizer,
            intercept,
            coefficients,
        })
    }

    //───────────────────────────── Prediction ────────────────────────────//

    pub fn predict(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        self.standardizer.transform(x).dot(&self.coefficients) + self.intercept
    }
}
