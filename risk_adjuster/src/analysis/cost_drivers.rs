//! cost_drivers.rs – what drives member spend
//!
//! The analyzer keeps its own cost model, separate from any risk model, and
//! explains it three ways: model importances and correlations (drivers),
//! per-record Shapley attributions, and a population variance decomposition.

use std::collections::BTreeMap;

use log::info;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_stats::CorrelationExt;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::analysis::attribution::{sample_background, RecordAttribution, ShapleyExplainer};
use crate::analysis::insights::generate_insights;
use crate::config::AnalyzerConfig;
use crate::data_handling::claims::{ClaimsProcessor, MemberRecord, TOTAL_COST};
use crate::ensemble_cv::{select_and_fit, CvMetrics};
use crate::estimators::FittedEstimator;
use crate::features::{cost_target, FeatureBuilder, FeatureSchema, PopulationThresholds};
use crate::hcc_mapping::ConditionMapper;
use crate::helper_functions::{has_column, population_variance, r2_score};
use crate::models::{schema_err, RiskError, RiskResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDriver {
    pub feature: String,
    pub importance: f64,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDrivers {
    pub feature_importance: BTreeMap<String, f64>,
    /// Pearson r of each feature against cost; 0 for constant columns.
    pub correlations: BTreeMap<String, f64>,
    /// Feature × feature Pearson r, rows and columns in `features` order.
    pub features: Vec<String>,
    pub correlation_matrix: Vec<Vec<f64>>,
    /// Importance descending, ties by |correlation| descending.
    pub top_drivers: Vec<CostDriver>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationMetrics {
    pub total_variance: f64,
    /// Squared correlation with cost, per feature. Overlapping features each claim their shared variance.
    pub variance_share_by_feature: BTreeMap<String, f64>,
    /// In-sample R² of the cost model.
    pub explained_share: f64,
    /// `explained_share − Σ variance_share_by_feature`: positive for interactions the
    /// single-feature shares miss, negative when features overlap.
    pub overlap_share: f64,
    pub residual_share: f64,
    pub coefficient_of_variation: f64,
    /// Fraction of total spend from the costliest 10% of members.
    pub top_decile_cost_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostDriverReport {
    pub cost_drivers: CostDrivers,
    pub attribution_values: Vec<RecordAttribution>,
    pub insights: Vec<String>,
    pub variation_metrics: VariationMetrics,
    pub model_metrics: CvMetrics,
}

struct CostModel {
    estimator: FittedEstimator,
    metrics: CvMetrics,
    background: Array2<f64>,
    /// Utilization cut-offs of the training batch; every later batch is built with them.
    thresholds: PopulationThresholds,
}

pub struct CostDriverAnalyzer<'m> {
    mapper: &'m ConditionMapper,
    config: AnalyzerConfig,
    schema: FeatureSchema,
    model: Option<CostModel>,
    /// Cut-offs fitted by `prepare_*` before any cost model exists.
    staged: Option<PopulationThresholds>,
}

impl Default for CostDriverAnalyzer<'static> {
    fn default() -> Self {
        Self::new(ConditionMapper::standard(), AnalyzerConfig::default())
    }
}

impl<'m> CostDriverAnalyzer<'m> {
    pub fn new(mapper: &'m ConditionMapper, config: AnalyzerConfig) -> Self {
        Self {
            mapper,
            config,
            schema: FeatureSchema::cost(),
            model: None,
            staged: None,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn fitted(&self) -> RiskResult<&CostModel> {
        self.model.as_ref().ok_or(RiskError::NotTrained)
    }

    fn check_width(&self, x: &ArrayView2<f64>) -> RiskResult<()> {
        if x.ncols() == self.schema.len() {
            Ok(())
        } else {
            Err(schema_err(format!(
                "cost features have {} columns, expected {}",
                x.ncols(),
                self.schema.len()
            )))
        }
    }

    //───────────────────────────── data ────────────────────────────//

    /// Cleans the frame and splits it into cost features and the spend target.
    pub fn prepare_cost_data(&mut self, df: &DataFrame) -> RiskResult<(Array2<f64>, Array1<f64>)> {
        if !has_column(df, TOTAL_COST) {
            return Err(schema_err(format!("cost column `{}` is absent", TOTAL_COST)));
        }
        let (records, _quality) = ClaimsProcessor::new(self.mapper).process(df)?;
        self.prepare_records(&records)
    }

    /// Before a cost model exists the batch's own cut-offs are fitted and staged for
    /// `fit_cost_model`; afterwards the model's cut-offs are reused.
    pub fn prepare_records(&mut self, records: &[MemberRecord]) -> RiskResult<(Array2<f64>, Array1<f64>)> {
        let builder = match &self.model {
            Some(model) => FeatureBuilder::new(self.mapper).with_thresholds(model.thresholds),
            None => {
                let builder = FeatureBuilder::new(self.mapper).fit(records);
                self.staged = Some(builder.thresholds());
                builder
            }
        };
        let x = builder.matrix(records, &self.schema)?;
        Ok((x, cost_target(records)))
    }

    pub fn thresholds(&self) -> Option<PopulationThresholds> {
        self.model.as_ref().map(|m| m.thresholds)
    }

    //───────────────────────────── model ────────────────────────────//

    /// Cross-validated selection on cost; replaces the current cost model only on success.
    /// `x` must come from `prepare_*` so the model knows which cut-offs built it.
    pub fn fit_cost_model(&mut self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> RiskResult<CvMetrics> {
        let thresholds = self
            .thresholds()
            .or(self.staged)
            .ok_or_else(|| schema_err("no prepared batch; call prepare_records before fitting"))?;
        self.fit_with_thresholds(x, y, thresholds)
    }

    fn fit_with_thresholds(
        &mut self,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        thresholds: PopulationThresholds,
    ) -> RiskResult<CvMetrics> {
        self.check_width(x)?;
        info!("Fitting cost model on {} members", x.nrows());
        let (estimator, metrics) = select_and_fit(x, y, &self.config.selection)?;
        let background = sample_background(x, self.config.background_size, self.config.seed);
        self.model = Some(CostModel {
            estimator,
            metrics: metrics.clone(),
            background,
            thresholds,
        });
        self.staged = None;
        Ok(metrics)
    }

    pub fn model_metrics(&self) -> RiskResult<CvMetrics> {
        Ok(self.fitted()?.metrics.clone())
    }

    pub fn identify_drivers(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> RiskResult<CostDrivers> {
        let model = self.fitted()?;
        self.check_width(x)?;
        let (matrix, target_r) = correlations(x, y)?;
        let importance = model.estimator.feature_importance();

        let mut drivers: Vec<CostDriver> = self
            .schema
            .columns
            .iter()
            .enumerate()
            .map(|(j, name)| CostDriver {
                feature: name.clone(),
                importance: importance[j],
                correlation: target_r[j],
            })
            .collect();
        drivers.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then(b.correlation.abs().total_cmp(&a.correlation.abs()))
        });

        let feature_importance = drivers
            .iter()
            .map(|d| (d.feature.clone(), d.importance))
            .collect();
        let correlations = drivers
            .iter()
            .map(|d| (d.feature.clone(), d.correlation))
            .collect();
        drivers.truncate(self.config.top_n);

        Ok(CostDrivers {
            feature_importance,
            correlations,
            features: self.schema.columns.clone(),
            correlation_matrix: matrix.outer_iter().map(|row| row.to_vec()).collect(),
            top_drivers: drivers,
        })
    }

    /// Shapley contributions of each row against the training background.
    pub fn attribute(&self, x: &ArrayView2<f64>) -> RiskResult<Vec<RecordAttribution>> {
        let model = self.fitted()?;
        self.check_width(x)?;
        let explainer = ShapleyExplainer::new(
            &model.estimator,
            &model.background,
            &self.schema.columns,
            self.config.permutations,
            self.config.seed,
        )?;
        explainer.explain_all(x)
    }

    pub fn variation_metrics(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> RiskResult<VariationMetrics> {
        let model = self.fitted()?;
        self.check_width(x)?;
        let costs = y.to_vec();
        let total_variance = population_variance(&costs);
        let (_, target_r) = correlations(x, y)?;

        let variance_share_by_feature: BTreeMap<String, f64> = self
            .schema
            .columns
            .iter()
            .cloned()
            .zip(target_r.iter().map(|r| r * r))
            .collect();
        let share_sum: f64 = variance_share_by_feature.values().sum();

        let fitted = model.estimator.predict(x);
        let explained_share = if total_variance > 0.0 {
            r2_score(&costs, &fitted.to_vec()).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mean = costs.iter().sum::<f64>() / costs.len().max(1) as f64;
        let coefficient_of_variation = if mean > 0.0 {
            total_variance.sqrt() / mean
        } else {
            0.0
        };

        Ok(VariationMetrics {
            total_variance,
            variance_share_by_feature,
            explained_share,
            overlap_share: explained_share - share_sum,
            residual_share: 1.0 - explained_share,
            coefficient_of_variation,
            top_decile_cost_share: top_decile_share(&costs),
        })
    }

    //───────────────────────────── report ────────────────────────────//

    pub fn analyze(&mut self, df: &DataFrame) -> RiskResult<CostDriverReport> {
        if !has_column(df, TOTAL_COST) {
            return Err(schema_err(format!("cost column `{}` is absent", TOTAL_COST)));
        }
        let (records, _quality) = ClaimsProcessor::new(self.mapper).process(df)?;
        self.analyze_records(&records)
    }

    /// Fits a fresh cost model on `records` (with their own cut-offs) and reports on them.
    pub fn analyze_records(&mut self, records: &[MemberRecord]) -> RiskResult<CostDriverReport> {
        let builder = FeatureBuilder::new(self.mapper).fit(records);
        let x = builder.matrix(records, &self.schema)?;
        let y = cost_target(records);
        let model_metrics = self.fit_with_thresholds(&x.view(), &y.view(), builder.thresholds())?;
        let cost_drivers = self.identify_drivers(&x.view(), &y.view())?;
        let variation_metrics = self.variation_metrics(&x.view(), &y.view())?;

        let sample = self.config.attribution_sample.min(records.len());
        let mut attribution_values = self.attribute(&x.slice(s![..sample, ..]))?;
        for (attr, record) in attribution_values.iter_mut().zip(records) {
            attr.member_id = Some(record.member_id.clone());
        }

        let insights = generate_insights(&cost_drivers, &variation_metrics, &model_metrics);
        info!(
            "Cost driver analysis complete: top driver {:?}, {} insights",
            cost_drivers.top_drivers.first().map(|d| d.feature.as_str()),
            insights.len()
        );
        Ok(CostDriverReport {
            cost_drivers,
            attribution_values,
            insights,
            variation_metrics,
            model_metrics,
        })
    }
}

//───────────────────────────────── helpers ─────────────────────────────────//

/// Feature × feature Pearson matrix and each feature's r with the target.
/// Undefined correlations (constant columns) are reported as 0.
fn correlations(x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> RiskResult<(Array2<f64>, Array1<f64>)> {
    if x.nrows() != y.len() {
        return Err(schema_err(format!("{} feature rows but {} costs", x.nrows(), y.len())));
    }
    if x.nrows() < 2 {
        return Err(RiskError::InsufficientData {
            found: x.nrows(),
            required: 2,
        });
    }
    let p = x.ncols();
    let joined = concatenate![Axis(1), x.view(), y.view().insert_axis(Axis(1))];
    let r = joined
        .t()
        .pearson_correlation()
        .map_err(|e| RiskError::Numerical(e.to_string()))?
        .mapv(|v| if v.is_finite() { v } else { 0.0 });

    let matrix = r.slice(s![..p, ..p]).to_owned();
    let target = r.slice(s![..p, p]).to_owned();
    Ok((matrix, target))
}

fn top_decile_share(costs: &[f64]) -> f64 {
    let total: f64 = costs.iter().sum();
    if costs.is_empty() || total <= 0.0 {
        return 0.0;
    }
    let mut sorted = costs.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let k = costs.len().div_ceil(10);
    sorted[..k].iter().sum::<f64>() / total
}
