use polars::prelude::*;

use risk_adjuster::analysis::cost_drivers::CostDriverAnalyzer;
use risk_adjuster::config::{AnalyzerConfig, TrainerConfig};
use risk_adjuster::data_handling::claims::{ClaimsDataset, ClaimsProcessor, MemberRecord};
use risk_adjuster::hcc_mapping::{ConditionMapper, Gender};
use risk_adjuster::helper_functions::dataframe_to_csv;
use risk_adjuster::models::{Dataset, RiskError};
use risk_adjuster::risk_model::{RiskEnsembleTrainer, RiskModelArtifact};

const CONDITIONS: [&str; 7] = [
    "diabetes",
    "hypertension",
    "heart_disease",
    "copd",
    "cancer",
    "kidney_disease",
    "mental_health",
];

/// 0–3 conditions each, ages spread over 0–100, alternating male/female.
fn members(n: usize, mapper: &ConditionMapper) -> Vec<MemberRecord> {
    (0..n)
        .map(|i| {
            let gender = if i % 2 == 0 { "male" } else { "female" };
            let mut record = MemberRecord::new(format!("M{:03}", i), ((i * 37) % 101) as i64, gender);
            for k in 0..(i % 4) {
                record = record.with_condition(CONDITIONS[(i + 3 * k) % CONDITIONS.len()]);
            }
            let score = mapper.member_risk_score(&record);
            let cost = 500.0 + 2000.0 * score + 10.0 * record.age as f64;
            record.with_utilization(cost, 1 + (i % 6) as u32)
        })
        .collect()
}

fn claims_frame(records: &[MemberRecord]) -> DataFrame {
    let mut columns = vec![
        Column::new(
            "member_id".into(),
            records.iter().map(|r| r.member_id.clone()).collect::<Vec<_>>(),
        ),
        Column::new("age".into(), records.iter().map(|r| r.age).collect::<Vec<_>>()),
        Column::new(
            "gender".into(),
            records.iter().map(|r| r.gender.as_str().to_uppercase()).collect::<Vec<_>>(),
        ),
        Column::new("total_cost".into(), records.iter().map(|r| r.total_cost).collect::<Vec<_>>()),
        Column::new(
            "total_claims".into(),
            records.iter().map(|r| r.total_claims as i64).collect::<Vec<_>>(),
        ),
    ];
    for name in CONDITIONS {
        let flags: Vec<i64> = records.iter().map(|r| r.has_condition(name) as i64).collect();
        columns.push(Column::new(name.into(), flags));
    }
    DataFrame::new(columns).unwrap()
}

#[test]
fn fifty_members_end_to_end() {
    let mapper = ConditionMapper::new().with_demographic_adjustment(Gender::Male, 40, 0.25);
    let population = members(50, &mapper);

    let mut trainer = RiskEnsembleTrainer::new(&mapper, TrainerConfig::default());
    let report = trainer.train_records(&population).unwrap();
    assert!(report.best_r2 >= 0.0);
    assert!(report.best_r2 >= report.mean_r2);
    assert_eq!(report.n_samples, 50);

    // held out, no conditions: only the demographic term remains
    let plain_male = MemberRecord::new("H1", 40, "Male").with_utilization(700.0, 2);
    let plain_female = MemberRecord::new("H2", 30, "female").with_utilization(900.0, 3);
    let male_score = trainer.predict_member_risk(&plain_male).unwrap();
    let female_score = trainer.predict_member_risk(&plain_female).unwrap();
    assert!((male_score - 0.25).abs() < 1e-3, "{}", male_score);
    assert!(female_score.abs() < 1e-3, "{}", female_score);

    assert_eq!(
        trainer.predict_member_risk(&plain_male).unwrap().to_bits(),
        male_score.to_bits()
    );
}

#[test]
fn insufficient_and_untrained_errors() {
    let mapper = ConditionMapper::standard();
    let mut trainer = RiskEnsembleTrainer::default();
    assert!(matches!(
        trainer.predict_member_risk(&MemberRecord::new("x", 30, "f")),
        Err(RiskError::NotTrained)
    ));
    assert!(matches!(
        trainer.train_records(&members(3, mapper)),
        Err(RiskError::InsufficientData { found: 3, .. })
    ));
}

#[test]
fn csv_to_reports() {
    let mapper = ConditionMapper::standard();
    let population = members(40, mapper);
    let mut frame = claims_frame(&population);

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("claims.csv");
    dataframe_to_csv(&mut frame, &csv_path.to_string_lossy()).unwrap();
    let loaded = ClaimsDataset {
        path: csv_path.to_string_lossy().into_owned(),
    }
    .load()
    .unwrap();

    let (records, quality) = ClaimsProcessor::new(mapper).process(&loaded).unwrap();
    assert_eq!(records.len(), 40);
    assert!(quality.is_clean());
    for (read, written) in records.iter().zip(&population) {
        assert_eq!(read.member_id, written.member_id);
        assert_eq!(read.gender, written.gender);
        assert_eq!(mapper.member_risk_score(read), mapper.member_risk_score(written));
    }

    let mut trainer = RiskEnsembleTrainer::default();
    trainer.train(&loaded).unwrap();
    let bytes = trainer.artifact().unwrap().to_bytes().unwrap();
    let mut restored = RiskEnsembleTrainer::default();
    restored.load_artifact(RiskModelArtifact::from_bytes(&bytes).unwrap()).unwrap();
    assert_eq!(
        restored.predict_batch(&records).unwrap(),
        trainer.predict_batch(&records).unwrap()
    );

    let config = AnalyzerConfig {
        attribution_sample: 4,
        background_size: 15,
        permutations: 6,
        ..Default::default()
    };
    let mut analyzer = CostDriverAnalyzer::new(mapper, config);
    let report = analyzer.analyze(&loaded).unwrap();
    assert_eq!(report.attribution_values.len(), 4);
    for attr in &report.attribution_values {
        let gap = attr.predicted - attr.baseline;
        assert!((attr.total_contribution() - gap).abs() <= 1e-3 * gap.abs().max(1.0));
    }
    for pair in report.cost_drivers.top_drivers.windows(2) {
        assert!(pair[0].importance >= pair[1].importance);
    }
    assert!(!report.insights.is_empty());
    assert!(serde_json::to_string(&report).is_ok());
}
