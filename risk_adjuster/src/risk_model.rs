//! risk_model.rs – trains, holds and applies the member risk model
//!
//! A trainer owns at most one [`RiskModelArtifact`]. `train` builds a complete
//! replacement before touching `self`, so a failed run leaves the previous model
//! in place; `&mut self` rules out two trainings racing on one instance.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use log::info;
use ndarray::{Array1, Axis};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::config::{RiskTarget, TierThresholds, TrainerConfig};
use crate::data_handling::claims::{ClaimsProcessor, MemberRecord};
use crate::ensemble_cv::{select_and_fit, CvMetrics};
use crate::estimators::{EstimatorFamily, FittedEstimator};
use crate::features::{FeatureBuilder, FeatureSchema, PopulationThresholds, SCHEMA_VERSION};
use crate::hcc_mapping::ConditionMapper;
use crate::models::{schema_err, RiskError, RiskResult};

impl RiskTarget {
    /// Feature columns a model of this target is trained on.
    pub fn schema(&self) -> FeatureSchema {
        match self {
            RiskTarget::CategoryScore => FeatureSchema::risk(),
            RiskTarget::TotalCost => FeatureSchema::cost(),
        }
    }

    pub fn values(&self, records: &[MemberRecord], mapper: &ConditionMapper) -> Array1<f64> {
        match self {
            RiskTarget::CategoryScore => records.iter().map(|r| mapper.member_risk_score(r)).collect(),
            RiskTarget::TotalCost => records.iter().map(|r| r.total_cost).collect(),
        }
    }
}

/// Everything needed to score new records the way the training batch was scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModelArtifact {
    pub estimator: FittedEstimator,
    pub schema: FeatureSchema,
    pub target: RiskTarget,
    pub thresholds: PopulationThresholds,
    pub metrics: CvMetrics,
    pub trained_at: DateTime<Utc>,
}

impl RiskModelArtifact {
    pub fn to_bytes(&self) -> RiskResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RiskResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn validate(&self) -> RiskResult<()> {
        if self.schema.version != SCHEMA_VERSION {
            return Err(schema_err(format!(
                "artifact feature schema v{} cannot be used with v{}",
                self.schema.version, SCHEMA_VERSION
            )));
        }
        self.target.schema().ensure_matches(&self.schema)?;
        if self.estimator.n_features() != self.schema.len() {
            return Err(schema_err(format!(
                "estimator expects {} features, schema has {}",
                self.estimator.n_features(),
                self.schema.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub best_family: EstimatorFamily,
    pub mean_r2: f64,
    pub best_r2: f64,
    pub candidate_scores: BTreeMap<String, f64>,
    pub n_samples: usize,
    pub n_folds: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub best_family: EstimatorFamily,
    pub mean_r2: f64,
    pub best_r2: f64,
    pub fold_scores: Vec<f64>,
    pub candidate_scores: BTreeMap<String, f64>,
}

impl From<&CvMetrics> for PerformanceMetrics {
    fn from(m: &CvMetrics) -> Self {
        Self {
            best_family: m.best_family,
            mean_r2: m.mean_r2,
            best_r2: m.best_r2,
            fold_scores: m.fold_scores.clone(),
            candidate_scores: m.candidate_scores.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_score(score: f64, tiers: &TierThresholds) -> Self {
        if score > tiers.high {
            RiskTier::High
        } else if score > tiers.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        };
        f.write_str(label)
    }
}

pub struct RiskEnsembleTrainer<'m> {
    mapper: &'m ConditionMapper,
    config: TrainerConfig,
    artifact: Option<RiskModelArtifact>,
}

impl Default for RiskEnsembleTrainer<'static> {
    fn default() -> Self {
        Self::new(ConditionMapper::standard(), TrainerConfig::default())
    }
}

impl<'m> RiskEnsembleTrainer<'m> {
    pub fn new(mapper: &'m ConditionMapper, config: TrainerConfig) -> Self {
        Self {
            mapper,
            config,
            artifact: None,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.artifact.is_some()
    }

    /// Cleans the claims frame, then trains on the surviving records.
    pub fn train(&mut self, df: &DataFrame) -> RiskResult<TrainingReport> {
        let (records, _quality) = ClaimsProcessor::new(self.mapper).process(df)?;
        self.train_records(&records)
    }

    pub fn train_records(&mut self, records: &[MemberRecord]) -> RiskResult<TrainingReport> {
        let required = self.config.selection.min_samples;
        if records.len() < required {
            return Err(RiskError::InsufficientData {
                found: records.len(),
                required,
            });
        }
        let target = self.config.target;
        let schema = target.schema();
        let builder = FeatureBuilder::new(self.mapper).fit(records);
        let x = builder.matrix(records, &schema)?;
        let y = target.values(records, self.mapper);
        info!("Training risk model on {} members ({:?} target)", records.len(), target);

        let (estimator, metrics) = select_and_fit(&x.view(), &y.view(), &self.config.selection)?;
        let artifact = RiskModelArtifact {
            estimator,
            schema,
            target,
            thresholds: builder.thresholds(),
            metrics,
            trained_at: Utc::now(),
        };
        let report = TrainingReport {
            best_family: artifact.metrics.best_family,
            mean_r2: artifact.metrics.mean_r2,
            best_r2: artifact.metrics.best_r2,
            candidate_scores: artifact.metrics.candidate_scores.clone(),
            n_samples: records.len(),
            n_folds: artifact.metrics.n_folds,
            trained_at: artifact.trained_at,
        };
        self.artifact = Some(artifact);
        Ok(report)
    }

    fn trained(&self) -> RiskResult<&RiskModelArtifact> {
        self.artifact.as_ref().ok_or(RiskError::NotTrained)
    }

    /// Non-negative score per record. Each row is evaluated on its own so a
    /// record scores identically whatever batch it arrives in.
    pub fn predict_batch(&self, records: &[MemberRecord]) -> RiskResult<Vec<f64>> {
        let artifact = self.trained()?;
        let x = FeatureBuilder::new(self.mapper)
            .with_thresholds(artifact.thresholds)
            .matrix(records, &artifact.schema)?;
        Ok(x.outer_iter()
            .map(|row| {
                let raw = artifact.estimator.predict(&row.insert_axis(Axis(0)))[0];
                raw.max(0.0)
            })
            .collect())
    }

    pub fn predict_member_risk(&self, record: &MemberRecord) -> RiskResult<f64> {
        let scores = self.predict_batch(std::slice::from_ref(record))?;
        Ok(scores[0])
    }

    /// Scores every row of a frame. Unlike training nothing is dropped: a row
    /// without id, age or gender is a schema error.
    pub fn predict_frame(&self, df: &DataFrame) -> RiskResult<Vec<(String, f64)>> {
        let records = ClaimsProcessor::new(self.mapper).records_from_frame(df)?;
        let scores = self.predict_batch(&records)?;
        Ok(records.into_iter().map(|r| r.member_id).zip(scores).collect())
    }

    /// Scores the record with `member_id` out of `records`.
    pub fn predict_member(&self, records: &[MemberRecord], member_id: &str) -> RiskResult<f64> {
        let record = records
            .iter()
            .find(|r| r.member_id == member_id)
            .ok_or_else(|| schema_err(format!("member {} not found", member_id)))?;
        self.predict_member_risk(record)
    }

    pub fn feature_importance(&self) -> RiskResult<BTreeMap<String, f64>> {
        let artifact = self.trained()?;
        let importance = artifact.estimator.feature_importance();
        Ok(artifact
            .schema
            .columns
            .iter()
            .cloned()
            .zip(importance.iter().copied())
            .collect())
    }

    pub fn performance_metrics(&self) -> RiskResult<PerformanceMetrics> {
        Ok(PerformanceMetrics::from(&self.trained()?.metrics))
    }

    pub fn artifact(&self) -> Option<&RiskModelArtifact> {
        self.artifact.as_ref()
    }

    /// Installs a previously trained artifact after checking its schema.
    pub fn load_artifact(&mut self, artifact: RiskModelArtifact) -> RiskResult<()> {
        artifact.validate()?;
        info!(
            "Loaded {} risk model trained at {}",
            artifact.metrics.best_family, artifact.trained_at
        );
        self.artifact = Some(artifact);
        Ok(())
    }
}
