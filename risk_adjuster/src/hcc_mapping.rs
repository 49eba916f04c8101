//! hcc_mapping.rs – condition → risk category catalog and the member risk score
//!
//! The catalog and weights are illustrative reference data, not the official
//! actuarial tables. They are built once and shared read-only.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::data_handling::claims::MemberRecord;

/// Condition name → category codes (many-to-many).
const CONDITION_CATEGORIES: &[(&str, &[&str])] = &[
    // diabetes
    ("diabetes", &["HCC_18", "HCC_19"]),
    ("diabetes_complications", &["HCC_17", "HCC_18", "HCC_19"]),
    // cardiovascular
    ("hypertension", &["HCC_85", "HCC_86"]),
    ("heart_disease", &["HCC_85", "HCC_88", "HCC_96"]),
    ("heart_failure", &["HCC_85", "HCC_88"]),
    ("stroke", &["HCC_100", "HCC_101"]),
    // respiratory
    ("copd", &["HCC_111", "HCC_112"]),
    ("asthma", &["HCC_111"]),
    // oncology
    ("cancer", &["HCC_8", "HCC_9", "HCC_10", "HCC_11", "HCC_12"]),
    ("breast_cancer", &["HCC_9"]),
    ("lung_cancer", &["HCC_8"]),
    ("prostate_cancer", &["HCC_10"]),
    // renal
    ("kidney_disease", &["HCC_136", "HCC_137"]),
    ("dialysis", &["HCC_136"]),
    // behavioural
    ("mental_health", &["HCC_57", "HCC_58", "HCC_59"]),
    ("depression", &["HCC_58"]),
    ("anxiety", &["HCC_57"]),
    ("bipolar", &["HCC_59"]),
    // other
    ("arthritis", &["HCC_40", "HCC_41"]),
    ("osteoporosis", &["HCC_40"]),
    ("alzheimer", &["HCC_51", "HCC_52"]),
    ("parkinson", &["HCC_51"]),
    ("hiv", &["HCC_1", "HCC_2"]),
    ("substance_abuse", &["HCC_54", "HCC_55"]),
];

const CATEGORY_WEIGHTS: &[(&str, f64)] = &[
    ("HCC_1", 1.0),
    ("HCC_2", 0.8),
    ("HCC_8", 2.5),
    ("HCC_9", 1.8),
    ("HCC_10", 1.5),
    ("HCC_11", 2.0),
    ("HCC_12", 2.2),
    ("HCC_17", 0.5),
    ("HCC_18", 1.2),
    ("HCC_19", 1.5),
    ("HCC_40", 0.3),
    ("HCC_41", 0.4),
    ("HCC_51", 1.8),
    ("HCC_52", 1.5),
    ("HCC_54", 0.6),
    ("HCC_55", 0.8),
    ("HCC_57", 0.4),
    ("HCC_58", 0.5),
    ("HCC_59", 0.7),
    ("HCC_85", 0.8),
    ("HCC_86", 0.6),
    ("HCC_88", 1.2),
    ("HCC_96", 1.0),
    ("HCC_100", 1.5),
    ("HCC_101", 1.8),
    ("HCC_111", 0.7),
    ("HCC_112", 1.0),
    ("HCC_136", 2.0),
    ("HCC_137", 1.5),
];

/// Upper bound of the demographic age axis; older members share the last cell.
pub const MAX_ADJUSTMENT_AGE: u8 = 100;

static STANDARD: LazyLock<ConditionMapper> = LazyLock::new(ConditionMapper::new);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    /// Case-insensitive; the claims feeds also use `m`/`f` and `1`/`0`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "male" | "m" | "1" => Gender::Male,
            "female" | "f" | "0" => Gender::Female,
            _ => Gender::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConditionMapper {
    catalog: HashMap<String, Vec<String>>,
    weights: HashMap<String, f64>,
    demographic: BTreeMap<(Gender, u8), f64>,
}

impl Default for ConditionMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionMapper {
    pub fn new() -> Self {
        let catalog: HashMap<String, Vec<String>> = CONDITION_CATEGORIES
            .iter()
            .map(|(cond, codes)| {
                (cond.to_string(), codes.iter().map(|c| c.to_string()).collect())
            })
            .collect();
        let weights: HashMap<String, f64> = CATEGORY_WEIGHTS
            .iter()
            .map(|(code, w)| (code.to_string(), w.max(0.0)))
            .collect();

        let mapper = Self {
            catalog,
            weights,
            demographic: BTreeMap::new(),
        };
        for code in mapper.unweighted_categories() {
            warn!("category {} has no weight; counted as 0.0", code);
        }
        mapper
    }

    /// Process-wide catalog with an empty demographic table.
    pub fn standard() -> &'static ConditionMapper {
        &STANDARD
    }

    /// Overrides one cell of the sparse demographic table.
    pub fn with_demographic_adjustment(mut self, gender: Gender, age: i64, value: f64) -> Self {
        self.demographic.insert((gender, clip_age(age)), value);
        self
    }

    pub fn demographic_adjustment(&self, gender: Gender, age: i64) -> f64 {
        self.demographic
            .get(&(gender, clip_age(age)))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn knows_condition(&self, condition: &str) -> bool {
        self.catalog.contains_key(condition)
    }

    pub fn category_weight(&self, code: &str) -> f64 {
        self.weights.get(code).copied().unwrap_or(0.0)
    }

    pub fn category_weights(&self) -> &HashMap<String, f64> {
        &self.weights
    }

    pub fn condition_mapping(&self) -> &HashMap<String, Vec<String>> {
        &self.catalog
    }

    /// Catalogued condition names, sorted.
    pub fn vocabulary(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.catalog.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Codes referenced by the catalog that the weight table does not cover.
    pub fn unweighted_categories(&self) -> BTreeSet<&str> {
        self.catalog
            .values()
            .flatten()
            .filter(|code| !self.weights.contains_key(code.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn map_conditions_to_categories<'a, I, K>(&self, conditions: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = (K, &'a u8)>,
        K: AsRef<str>,
    {
        let mut codes = BTreeSet::new();
        for (name, &flag) in conditions {
            if flag == 0 {
                continue;
            }
            if let Some(mapped) = self.catalog.get(name.as_ref()) {
                codes.extend(mapped.iter().cloned());
            }
        }
        codes
    }

    /// Σ distinct category weights + demographic adjustment, floored at zero.
    pub fn compute_risk_score<'a, I, K>(&self, conditions: I, age: i64, gender: &str) -> f64
    where
        I: IntoIterator<Item = (K, &'a u8)>,
        K: AsRef<str>,
    {
        let category_sum: f64 = self
            .map_conditions_to_categories(conditions)
            .iter()
            .map(|code| self.category_weight(code))
            .sum();
        let adjustment = self.demographic_adjustment(Gender::parse(gender), age);
        (category_sum + adjustment).max(0.0)
    }

    pub fn member_risk_score(&self, record: &MemberRecord) -> f64 {
        self.compute_risk_score(&record.conditions, record.age, record.gender.as_str())
    }
}

fn clip_age(age: i64) -> u8 {
    age.clamp(0, MAX_ADJUSTMENT_AGE as i64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(names: &[&str]) -> BTreeMap<String, u8> {
        names.iter().map(|n| (n.to_string(), 1u8)).collect()
    }

    fn weight_of(mapper: &ConditionMapper, name: &str) -> f64 {
        mapper
            .map_conditions_to_categories(&flags(&[name]))
            .iter()
            .map(|c| mapper.category_weight(c))
            .sum()
    }

    #[test]
    fn maps_and_deduplicates_categories() {
        let mapper = ConditionMapper::new();
        let mut conditions = flags(&["diabetes", "diabetes_complications"]);
        conditions.insert("cancer".into(), 0);
        conditions.insert("not_a_condition".into(), 1);

        let codes = mapper.map_conditions_to_categories(&conditions);
        let expected: BTreeSet<String> =
            ["HCC_17", "HCC_18", "HCC_19"].iter().map(|s| s.to_string()).collect();
        assert_eq!(codes, expected);
    }

    #[test]
    fn overlapping_categories_are_counted_once() {
        let mapper = ConditionMapper::new();
        // both imply HCC_85 and HCC_88
        let both = mapper.compute_risk_score(&flags(&["heart_disease", "heart_failure"]), 70, "male");
        let separate = weight_of(&mapper, "heart_disease") + weight_of(&mapper, "heart_failure");
        assert!(both < separate);
        assert!((both - 3.0).abs() < 1e-12);

        // disjoint sets add up exactly
        let disjoint = mapper.compute_risk_score(&flags(&["copd", "hiv"]), 40, "female");
        let sum = weight_of(&mapper, "copd") + weight_of(&mapper, "hiv");
        assert!((disjoint - sum).abs() < 1e-12);
    }

    #[test]
    fn adding_a_new_category_never_lowers_the_score() {
        let mapper = ConditionMapper::new();
        let vocab: Vec<String> = mapper.vocabulary().iter().map(|s| s.to_string()).collect();
        let mut current: BTreeMap<String, u8> = BTreeMap::new();
        let mut last = mapper.compute_risk_score(&current, 50, "female");
        for name in &vocab {
            current.insert(name.clone(), 1);
            let next = mapper.compute_risk_score(&current, 50, "female");
            assert!(next >= last, "{} lowered the score", name);
            last = next;
        }
    }

    #[test]
    fn score_is_never_negative_and_demographics_are_sparse() {
        let mapper = ConditionMapper::new()
            .with_demographic_adjustment(Gender::Female, 30, -5.0)
            .with_demographic_adjustment(Gender::Male, 150, 0.25);

        assert_eq!(mapper.compute_risk_score(&flags(&["asthma"]), 30, "FEMALE"), 0.0);
        // ages above the axis share the last cell
        assert_eq!(mapper.demographic_adjustment(Gender::Male, 100), 0.25);
        assert_eq!(mapper.compute_risk_score(&BTreeMap::<String, u8>::new(), 101, "Male"), 0.25);
        // absent cells default to zero, unknown genders fall into their own bucket
        assert_eq!(mapper.demographic_adjustment(Gender::Female, 31), 0.0);
        assert_eq!(mapper.compute_risk_score(&BTreeMap::<String, u8>::new(), 30, "n/a"), 0.0);
    }

    #[test]
    fn every_catalogued_code_is_weighted() {
        assert!(ConditionMapper::standard().unweighted_categories().is_empty());
    }

    #[test]
    fn gender_tokens_are_normalised() {
        assert_eq!(Gender::parse(" M "), Gender::Male);
        assert_eq!(Gender::parse("Female"), Gender::Female);
        assert_eq!(Gender::parse("0"), Gender::Female);
        assert_eq!(Gender::parse("other"), Gender::Unknown);
    }
}
