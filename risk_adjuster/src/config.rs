//! config.rs – run-time knobs for model selection, cost analysis and risk tiering
//!
//! Every struct is `serde(default)`, so a JSON file only needs the keys it overrides.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::estimators::{EstimatorFamily, EstimatorParams};
use crate::models::RiskResult;

/// Cross-validated selection settings shared by the risk trainer and the cost analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub n_folds: usize,
    /// Below this many usable records training refuses to run.
    pub min_samples: usize,
    /// The fold count shrinks until every held-out fold has at least this many rows.
    pub min_fold_size: usize,
    /// Mean-R² gap under which the simpler family wins.
    pub tie_epsilon: f64,
    pub seed: u64,
    /// Families tried besides the constant baseline, which always competes.
    pub candidates: Vec<EstimatorFamily>,
    pub estimators: EstimatorParams,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            min_samples: 20,
            min_fold_size: 4,
            tie_epsilon: 1e-3,
            seed: 42,
            candidates: vec![
                EstimatorFamily::Linear,
                EstimatorFamily::Tweedie,
                EstimatorFamily::GradientBoosting,
            ],
            estimators: EstimatorParams::default(),
        }
    }
}

/// What the risk model learns to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTarget {
    /// The condition-category score of each member.
    #[default]
    CategoryScore,
    /// Observed total spend; trained on the cost schema.
    TotalCost,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub selection: SelectionConfig,
    pub target: RiskTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub selection: SelectionConfig,
    pub top_n: usize,
    /// Records (from the front of the batch) that get a per-feature attribution in `analyze`.
    pub attribution_sample: usize,
    /// Training rows kept as the Shapley background population.
    pub background_size: usize,
    /// Sampled feature orderings per record; rounded up to an even number.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            top_n: 10,
            attribution_sample: 100,
            background_size: 50,
            permutations: 64,
            seed: 42,
        }
    }
}

/// Presentation cut-offs: above `high` is high risk, above `medium` is medium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: 0.7,
            medium: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub trainer: TrainerConfig,
    pub analyzer: AnalyzerConfig,
    pub tiers: TierThresholds,
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> RiskResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    pub fn write_json_file(&self, path: impl AsRef<Path>) -> RiskResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
