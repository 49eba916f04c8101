//! tweedie.rs – log-link Tweedie GLM for skewed, non-negative cost-like targets
//!
//! Fitted with `linfa_linear::TweedieRegressor` on z-scored features; the fitted
//! coefficients are copied out so the model serialises with the rest of the artifact.

use linfa::prelude::*;
use linfa_linear::{Link, TweedieRegressor};
use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::estimators::Standardizer;
use crate::models::{RiskError, RiskResult};

/// Linear-predictor clamp; keeps `exp` finite for extreme inputs.
const ETA_LIMIT: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweedieParams {
    /// Variance power; 1 < p < 2 is compound Poisson–gamma.
    pub power: f64,
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for TweedieParams {
    fn default() -> Self {
        Self {
            power: 1.5,
            alpha: 1e-3,
            max_iter: 200,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweedieModel {
    pub standardizer: Standardizer,
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    pub power: f64,
}

impl TweedieModel {
    pub fn fit(x: &ArrayView2<f64>, y: &ArrayView1<f64>, params: &TweedieParams) -> RiskResult<Self> {
        if y.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            return Err(RiskError::Numerical(
                "tweedie targets must be finite and non-negative".into(),
            ));
        }
        let standardizer = Standardizer::fit(x);
        let z = standardizer.transform(x);

        if y.iter().mean() <= 0.0 {
            // all-zero target: the MLE is the -inf intercept, clamp it
            return Ok(Self {
                standardizer,
                intercept: -ETA_LIMIT,
                coefficients: Array1::zeros(z.ncols()),
                power: params.power,
            });
        }

        let ds = Dataset::new(z, y.to_owned());
        let model = TweedieRegressor::params()
            .power(params.power)
            .alpha(params.alpha)
            .link(Link::Log)
            .fit_intercept(true)
            .max_iter(params.max_iter)
            .tol(params.tol)
            .fit(&ds)?;

        if !model.intercept.is_finite() || model.coef.iter().any(|c| !c.is_finite()) {
            return Err(RiskError::Numerical("tweedie fit is not finite".into()));
        }
        debug!(
            "tweedie fit: intercept {:.6}, coefficients {:?}",
            model.intercept, model.coef
        );

        Ok(Self {
            standardizer,
            intercept: model.intercept,
            coefficients: model.coef,
            power: params.power,
        })
    }

    /// Mean response `exp(η)`; always positive.
    pub fn predict(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        let eta = self.standardizer.transform(x).dot(&self.coefficients) + self.intercept;
        eta.mapv(|e| e.clamp(-ETA_LIMIT, ETA_LIMIT).exp())
    }
}
