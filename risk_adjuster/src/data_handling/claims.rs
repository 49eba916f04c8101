use std::collections::{BTreeMap, HashSet};
use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use tracing::{debug, info, warn};

use crate::hcc_mapping::{ConditionMapper, Gender};
use crate::helper_functions::{f64_column, has_column, read_csv, require_columns, str_column};
use crate::models::{schema_err, Dataset, RiskResult};

pub const MEMBER_ID: &str = "member_id";
pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const TOTAL_COST: &str = "total_cost";
pub const TOTAL_CLAIMS: &str = "total_claims";

pub const REQUIRED_COLUMNS: [&str; 5] = [MEMBER_ID, AGE, GENDER, TOTAL_COST, TOTAL_CLAIMS];

/// Highest age accepted from a claims feed.
pub const MAX_REALISTIC_AGE: f64 = 120.0;

/// CSV-backed claims extract.
pub struct ClaimsDataset {
    pub path: String,
}

impl Dataset for ClaimsDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading claims data from {}", &self.path);
        match read_csv(&self.path) {
            Ok(df) => Ok(df),
            Err(e) => {
                tracing::error!("Failed to read claims CSV: {}", e);
                Err(e)
            }
        }
    }
}

/// One cleaned member row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id: String,
    pub age: i64,
    pub gender: Gender,
    pub total_cost: f64,
    pub total_claims: u32,
    /// Condition flags as 0/1; absent conditions are simply missing.
    pub conditions: BTreeMap<String, u8>,
}

impl MemberRecord {
    pub fn new(member_id: impl Into<String>, age: i64, gender: &str) -> Self {
        Self {
            member_id: member_id.into(),
            age,
            gender: Gender::parse(gender),
            total_cost: 0.0,
            total_claims: 0,
            conditions: BTreeMap::new(),
        }
    }

    pub fn with_utilization(mut self, total_cost: f64, total_claims: u32) -> Self {
        self.total_cost = total_cost;
        self.total_claims = total_claims;
        self
    }

    pub fn with_condition(mut self, name: &str) -> Self {
        self.conditions.insert(name.to_string(), 1);
        self
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.get(name).is_some_and(|&flag| flag > 0)
    }
}

/// Row-level anomaly that was corrected or dropped instead of failing the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataQualityWarning {
    DuplicateMember,
    MissingMemberId,
    UnrealisticAge,
    NegativeCost,
    MissingCost,
    InfiniteCost,
    InvalidClaims,
    UnknownGender,
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DataQualityWarning::DuplicateMember => "duplicate member rows dropped",
            DataQualityWarning::MissingMemberId => "rows without member id dropped",
            DataQualityWarning::UnrealisticAge => "rows with missing or unrealistic age dropped",
            DataQualityWarning::NegativeCost => "rows with negative cost dropped",
            DataQualityWarning::MissingCost => "rows with missing or NaN cost dropped",
            DataQualityWarning::InfiniteCost => "rows with infinite cost dropped",
            DataQualityWarning::InvalidClaims => {
                "rows with negative, missing or non-finite claim counts dropped"
            }
            DataQualityWarning::UnknownGender => "unrecognised genders mapped to unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub input_rows: usize,
    pub kept_rows: usize,
    pub warnings: BTreeMap<DataQualityWarning, usize>,
}

impl DataQualityReport {
    fn record(&mut self, warning: DataQualityWarning) {
        *self.warnings.entry(warning).or_default() += 1;
    }

    pub fn count(&self, warning: DataQualityWarning) -> usize {
        self.warnings.get(&warning).copied().unwrap_or(0)
    }

    pub fn dropped_rows(&self) -> usize {
        self.input_rows - self.kept_rows
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimsSummary {
    pub records: usize,
    pub unique_members: usize,
    pub cost_mean: f64,
    pub cost_median: f64,
    pub cost_std: f64,
}

/// Validates and cleans a claims table into [`MemberRecord`]s.
pub struct ClaimsProcessor<'m> {
    mapper: &'m ConditionMapper,
}

impl Default for ClaimsProcessor<'static> {
    fn default() -> Self {
        Self::new(ConditionMapper::standard())
    }
}

impl<'m> ClaimsProcessor<'m> {
    pub fn new(mapper: &'m ConditionMapper) -> Self {
        Self { mapper }
    }

    /// Lenient path: missing columns abort, bad rows are dropped and counted.
    pub fn process(&self, df: &DataFrame) -> RiskResult<(Vec<MemberRecord>, DataQualityReport)> {
        info!("Processing claims data ({} rows)", df.height());
        require_columns(df, &REQUIRED_COLUMNS)?;

        let ids = str_column(df, MEMBER_ID)?;
        let ages = f64_column(df, AGE)?;
        let genders = str_column(df, GENDER)?;
        let costs = f64_column(df, TOTAL_COST)?;
        let claims = f64_column(df, TOTAL_CLAIMS)?;
        let conditions = self.condition_columns(df)?;

        let mut report = DataQualityReport {
            input_rows: df.height(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut records = Vec::with_capacity(df.height());

        for i in 0..df.height() {
            let member_id = match ids[i].as_deref() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    report.record(DataQualityWarning::MissingMemberId);
                    continue;
                }
            };
            let age = match ages[i] {
                Some(a) if (0.0..=MAX_REALISTIC_AGE).contains(&a) => a.floor() as i64,
                _ => {
                    report.record(DataQualityWarning::UnrealisticAge);
                    continue;
                }
            };
            let total_cost = match costs[i] {
                Some(c) if c.is_nan() => {
                    report.record(DataQualityWarning::MissingCost);
                    continue;
                }
                Some(c) if c.is_infinite() => {
                    report.record(DataQualityWarning::InfiniteCost);
                    continue;
                }
                Some(c) if c >= 0.0 => c,
                Some(_) => {
                    report.record(DataQualityWarning::NegativeCost);
                    continue;
                }
                None => {
                    report.record(DataQualityWarning::MissingCost);
                    continue;
                }
            };
            let total_claims = match claims[i] {
                Some(n) if n.is_finite() && n >= 0.0 => n.round() as u32,
                _ => {
                    report.record(DataQualityWarning::InvalidClaims);
                    continue;
                }
            };
            if !seen.insert(member_id.clone()) {
                report.record(DataQualityWarning::DuplicateMember);
                continue;
            }

            let gender = Gender::parse(genders[i].as_deref().unwrap_or(""));
            if gender == Gender::Unknown {
                report.record(DataQualityWarning::UnknownGender);
            }

            records.push(MemberRecord {
                member_id,
                age,
                gender,
                total_cost,
                total_claims,
                conditions: conditions_for_row(&conditions, i),
            });
        }

        report.kept_rows = records.len();
        for (warning, count) in &report.warnings {
            warn!("data quality: {} ({})", warning, count);
        }
        info!(
            "Claims data processed: kept {} of {} rows",
            report.kept_rows, report.input_rows
        );
        Ok((records, report))
    }

    /// Strict path: every required value must be present, nothing is dropped.
    pub fn records_from_frame(&self, df: &DataFrame) -> RiskResult<Vec<MemberRecord>> {
        require_columns(df, &[MEMBER_ID, AGE, GENDER])?;

        let ids = str_column(df, MEMBER_ID)?;
        let ages = f64_column(df, AGE)?;
        let genders = str_column(df, GENDER)?;
        let costs = optional_f64_column(df, TOTAL_COST)?;
        let claims = optional_f64_column(df, TOTAL_CLAIMS)?;
        let conditions = self.condition_columns(df)?;

        (0..df.height())
            .map(|i| {
                let member_id = ids[i]
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| schema_err(format!("row {}: {} is null", i, MEMBER_ID)))?;
                let age = ages[i]
                    .filter(|a| a.is_finite())
                    .ok_or_else(|| schema_err(format!("member {}: {} is null", member_id, AGE)))?;
                let gender = genders[i]
                    .as_deref()
                    .ok_or_else(|| schema_err(format!("member {}: {} is null", member_id, GENDER)))?;
                Ok(MemberRecord {
                    age: age.floor() as i64,
                    gender: Gender::parse(gender),
                    total_cost: finite_or_zero(costs[i]),
                    total_claims: finite_or_zero(claims[i]).round() as u32,
                    conditions: conditions_for_row(&conditions, i),
                    member_id,
                })
            })
            .collect()
    }

    pub fn summary(&self, records: &[MemberRecord]) -> ClaimsSummary {
        let costs: Vec<f64> = records.iter().map(|r| r.total_cost).collect();
        let unique: HashSet<&str> = records.iter().map(|r| r.member_id.as_str()).collect();
        let (mean, std) = if costs.len() > 1 {
            (costs.iter().mean(), costs.iter().std_dev())
        } else {
            (costs.first().copied().unwrap_or(0.0), 0.0)
        };
        let median = if costs.is_empty() {
            0.0
        } else {
            Data::new(costs.clone()).median()
        };
        debug!("cost mean={:.2} median={:.2} std={:.2}", mean, median, std);
        ClaimsSummary {
            records: records.len(),
            unique_members: unique.len(),
            cost_mean: mean,
            cost_median: median,
            cost_std: std,
        }
    }

    /// Catalogued condition columns present in the frame, as 0/1 flags.
    fn condition_columns(&self, df: &DataFrame) -> RiskResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for name in self.mapper.vocabulary() {
            if !has_column(df, name) {
                continue;
            }
            let flags = f64_column(df, name)?
                .into_iter()
                .map(|v| u8::from(v.unwrap_or(0.0) > 0.0))
                .collect();
            out.push((name.to_string(), flags));
        }
        debug!("condition columns found: {}", out.len());
        Ok(out)
    }
}

fn optional_f64_column(df: &DataFrame, name: &str) -> RiskResult<Vec<Option<f64>>> {
    if has_column(df, name) {
        f64_column(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

/// Optional utilization values: absent or non-finite become 0, negatives are floored at 0.
fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0)
}

fn conditions_for_row(columns: &[(String, Vec<u8>)], row: usize) -> BTreeMap<String, u8> {
    columns
        .iter()
        .map(|(name, flags)| (name.clone(), flags[row]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn dirty_frame() -> DataFrame {
        df![
            "member_id" => &["A1", "A2", "A3", "A4", "A1", "A6", "A7"],
            "age" => &[45.0, -5.0, 130.0, 67.0, 45.0, 30.0, 52.0],
            "gender" => &["M", "f", "male", "Female", "M", "x", "0"],
            "total_cost" => &[1200.0, 500.0, 800.0, -100.0, 1200.0, 300.0, 0.0],
            "total_claims" => &[4.0, 2.0, 1.0, 3.0, 4.0, 1.0, 0.0],
            "diabetes" => &[1, 0, 0, 1, 1, 0, 2],
            "cancer" => &[0, 0, 1, 0, 0, 0, 0]
        ]
        .unwrap()
    }

    #[test]
    fn drops_and_counts_bad_rows() {
        let processor = ClaimsProcessor::default();
        let (records, report) = processor.process(&dirty_frame()).unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.member_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "A6", "A7"]);
        assert_eq!(report.input_rows, 7);
        assert_eq!(report.dropped_rows(), 4);
        assert_eq!(report.count(DataQualityWarning::UnrealisticAge), 2);
        assert_eq!(report.count(DataQualityWarning::NegativeCost), 1);
        assert_eq!(report.count(DataQualityWarning::DuplicateMember), 1);
        assert_eq!(report.count(DataQualityWarning::UnknownGender), 1);

        assert_eq!(records[0].gender, Gender::Male);
        assert!(records[0].has_condition("diabetes"));
        assert!(!records[0].has_condition("cancer"));
        assert_eq!(records[2].gender, Gender::Female);
        assert_eq!(records[2].conditions.get("diabetes"), Some(&1));
    }

    #[test]
    fn non_finite_costs_and_claims_are_dropped_with_matching_warnings() {
        let df = df![
            "member_id" => &["B1", "B2", "B3", "B4", "B5", "B6"],
            "age" => &[40.0, 41.0, 42.0, 43.0, 44.0, 45.0],
            "gender" => &["m", "f", "m", "f", "m", "f"],
            "total_cost" => &[f64::INFINITY, f64::NAN, -3.0, f64::NEG_INFINITY, 250.0, 300.0],
            "total_claims" => &[1.0, 1.0, 1.0, 1.0, f64::NAN, 2.0]
        ]
        .unwrap();
        let (records, report) = ClaimsProcessor::default().process(&df).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].member_id, "B6");
        assert!(records.iter().all(|r| r.total_cost.is_finite()));
        assert_eq!(report.count(DataQualityWarning::InfiniteCost), 2);
        assert_eq!(report.count(DataQualityWarning::MissingCost), 1);
        assert_eq!(report.count(DataQualityWarning::NegativeCost), 1);
        assert_eq!(report.count(DataQualityWarning::InvalidClaims), 1);
        assert_eq!(report.dropped_rows(), 5);
        assert_eq!(
            DataQualityWarning::MissingCost.to_string(),
            "rows with missing or NaN cost dropped"
        );
    }

    #[test]
    fn strict_conversion_zeroes_non_finite_utilization() {
        let df = df![
            "member_id" => &["A1"],
            "age" => &[40.0],
            "gender" => &["m"],
            "total_cost" => &[f64::INFINITY],
            "total_claims" => &[f64::NAN]
        ]
        .unwrap();
        let records = ClaimsProcessor::default().records_from_frame(&df).unwrap();
        assert_eq!(records[0].total_cost, 0.0);
        assert_eq!(records[0].total_claims, 0);
    }

    #[test]
    fn missing_required_column_is_a_schema_error() {
        let df = df![
            "member_id" => &["A1"],
            "age" => &[40],
            "gender" => &["m"],
            "total_claims" => &[1]
        ]
        .unwrap();
        let err = ClaimsProcessor::default().process(&df).unwrap_err();
        assert!(matches!(err, crate::models::RiskError::Schema(_)));
    }

    #[test]
    fn strict_conversion_rejects_null_age() {
        let df = df![
            "member_id" => &["A1", "A2"],
            "age" => &[Some(40.0), None],
            "gender" => &["m", "f"]
        ]
        .unwrap();
        let err = ClaimsProcessor::default().records_from_frame(&df).unwrap_err();
        assert!(matches!(err, crate::models::RiskError::Schema(_)));
    }

    #[test]
    fn optional_columns_default_to_absent() {
        let df = df![
            "member_id" => &["A1"],
            "age" => &[40],
            "gender" => &["m"]
        ]
        .unwrap();
        let records = ClaimsProcessor::default().records_from_frame(&df).unwrap();
        assert_eq!(records[0].total_claims, 0);
        assert!(records[0].conditions.is_empty());
    }

    #[test]
    fn summarises_costs() {
        let records = vec![
            MemberRecord::new("a", 30, "m").with_utilization(100.0, 1),
            MemberRecord::new("b", 40, "f").with_utilization(300.0, 2),
            MemberRecord::new("c", 50, "f").with_utilization(200.0, 2),
        ];
        let summary = ClaimsProcessor::default().summary(&records);
        assert_eq!(summary.unique_members, 3);
        assert!((summary.cost_mean - 200.0).abs() < 1e-9);
        assert!((summary.cost_median - 200.0).abs() < 1e-9);
        assert!((summary.cost_std - 100.0).abs() < 1e-9);
    }
}
