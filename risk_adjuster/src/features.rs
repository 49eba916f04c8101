//! features.rs – fixed-schema feature vectors built from cleaned member records

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::data_handling::claims::MemberRecord;
use crate::hcc_mapping::{ConditionMapper, Gender};
use crate::models::{schema_err, RiskResult};

/// Bumped whenever a column is added, removed or changes meaning.
pub const SCHEMA_VERSION: u32 = 1;

pub const FEATURE_NAMES: [&str; 12] = [
    "age",
    "gender_encoded",
    "chronic_condition_count",
    "high_severity_condition_count",
    "total_condition_count",
    "age_group",
    "cost_per_claim",
    "elderly",
    "young_adult",
    "risk_category_score",
    "high_utilizer",
    "high_cost_member",
];

/// Columns derived from the cost target itself.
pub const COST_DERIVED_FEATURES: [&str; 2] = ["cost_per_claim", "high_cost_member"];

pub const CHRONIC_CONDITIONS: [&str; 4] = ["diabetes", "hypertension", "heart_disease", "copd"];
pub const HIGH_SEVERITY_CONDITIONS: [&str; 3] = ["cancer", "kidney_disease", "mental_health"];

/// Population quantile used for the utilization and cost flags.
pub const HIGH_FLAG_QUANTILE: f64 = 0.8;

/// Lower edges of the age bins [0–17], [18–34], [35–49], [50–64], [65+].
const AGE_GROUP_EDGES: [i64; 4] = [18, 35, 50, 65];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub columns: Vec<String>,
}

impl FeatureSchema {
    /// Every column [`FeatureBuilder`] produces, in order.
    pub fn risk() -> Self {
        Self {
            version: SCHEMA_VERSION,
            columns: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Risk schema without the cost-derived columns.
    pub fn cost() -> Self {
        Self {
            version: SCHEMA_VERSION,
            columns: FEATURE_NAMES
                .iter()
                .filter(|name| !COST_DERIVED_FEATURES.contains(*name))
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn ensure_matches(&self, other: &FeatureSchema) -> RiskResult<()> {
        if self == other {
            Ok(())
        } else {
            Err(schema_err(format!(
                "feature schema v{} {:?} does not match v{} {:?}; retrain the model",
                other.version, other.columns, self.version, self.columns
            )))
        }
    }

    fn indices(&self) -> RiskResult<Vec<usize>> {
        self.columns
            .iter()
            .map(|name| {
                FEATURE_NAMES
                    .iter()
                    .position(|f| *f == name.as_str())
                    .ok_or_else(|| schema_err(format!("unknown feature column {}", name)))
            })
            .collect()
    }
}

/// One member's features in [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub member_id: String,
    pub values: [f64; FEATURE_NAMES.len()],
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|f| *f == name)
            .map(|i| self.values[i])
    }
}

/// 80th-percentile cut-offs of the population the builder was fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationThresholds {
    pub claims: f64,
    pub cost: f64,
}

impl Default for PopulationThresholds {
    /// Unfitted: nobody is flagged.
    fn default() -> Self {
        Self {
            claims: f64::INFINITY,
            cost: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureBuilder<'m> {
    mapper: &'m ConditionMapper,
    thresholds: PopulationThresholds,
}

impl<'m> FeatureBuilder<'m> {
    pub fn new(mapper: &'m ConditionMapper) -> Self {
        Self {
            mapper,
            thresholds: PopulationThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: PopulationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Fixes the utilization/cost flag cut-offs to this population.
    pub fn fit(mut self, records: &[MemberRecord]) -> Self {
        if !records.is_empty() {
            let claims: Vec<f64> = records.iter().map(|r| r.total_claims as f64).collect();
            let costs: Vec<f64> = records.iter().map(|r| r.total_cost).collect();
            self.thresholds = PopulationThresholds {
                claims: Data::new(claims).quantile(HIGH_FLAG_QUANTILE),
                cost: Data::new(costs).quantile(HIGH_FLAG_QUANTILE),
            };
        }
        self
    }

    pub fn thresholds(&self) -> PopulationThresholds {
        self.thresholds
    }

    pub fn mapper(&self) -> &'m ConditionMapper {
        self.mapper
    }

    pub fn build_features(&self, record: &MemberRecord) -> FeatureVector {
        let age = record.age.clamp(0, crate::data_handling::claims::MAX_REALISTIC_AGE as i64);
        let chronic = count_flags(record, &CHRONIC_CONDITIONS);
        let severe = count_flags(record, &HIGH_SEVERITY_CONDITIONS);
        let total = record.conditions.values().filter(|&&f| f > 0).count() as f64;
        let cost_per_claim = if record.total_claims > 0 {
            record.total_cost / record.total_claims as f64
        } else {
            0.0
        };

        FeatureVector {
            member_id: record.member_id.clone(),
            values: [
                age as f64,
                encode_gender(record.gender),
                chronic,
                severe,
                total,
                age_group(age) as f64,
                cost_per_claim,
                flag(age >= 65),
                flag((18..=35).contains(&age)),
                self.mapper.member_risk_score(record),
                flag(record.total_claims as f64 >= self.thresholds.claims),
                flag(record.total_cost >= self.thresholds.cost),
            ],
        }
    }

    pub fn build_all(&self, records: &[MemberRecord]) -> Vec<FeatureVector> {
        records.iter().map(|r| self.build_features(r)).collect()
    }

    /// Row-major matrix restricted to `schema`'s columns.
    pub fn matrix(&self, records: &[MemberRecord], schema: &FeatureSchema) -> RiskResult<Array2<f64>> {
        let idx = schema.indices()?;
        let mut x = Array2::<f64>::zeros((records.len(), idx.len()));
        for (i, record) in records.iter().enumerate() {
            let fv = self.build_features(record);
            for (j, &k) in idx.iter().enumerate() {
                x[[i, j]] = fv.values[k];
            }
        }
        Ok(x)
    }
}

pub fn cost_target(records: &[MemberRecord]) -> Array1<f64> {
    records.iter().map(|r| r.total_cost).collect()
}

pub fn age_group(age: i64) -> usize {
    AGE_GROUP_EDGES.iter().filter(|&&edge| age >= edge).count()
}

fn encode_gender(gender: Gender) -> f64 {
    match gender {
        Gender::Male => 1.0,
        Gender::Female => 0.0,
        Gender::Unknown => 0.5,
    }
}

fn count_flags(record: &MemberRecord, names: &[&str]) -> f64 {
    names.iter().filter(|n| record.has_condition(n)).count() as f64
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}
