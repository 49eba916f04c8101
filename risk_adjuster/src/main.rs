use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use risk_adjuster::analysis::cost_drivers::{CostDriverAnalyzer, CostDriverReport};
use risk_adjuster::config::EngineConfig;
use risk_adjuster::data_handling::claims::{ClaimsDataset, ClaimsProcessor, MemberRecord};
use risk_adjuster::features::{FeatureBuilder, FEATURE_NAMES};
use risk_adjuster::hcc_mapping::ConditionMapper;
use risk_adjuster::helper_functions::{dataframe_to_csv, project_root};
use risk_adjuster::models::Dataset;
use risk_adjuster::risk_model::{RiskEnsembleTrainer, RiskTier};

const CONFIG_ENV: &str = "RISK_ADJUSTER_CONFIG";
const DEFAULT_CLAIMS: &str = "./data/claims.csv";
const DEFAULT_OUTPUT_DIR: &str = "./results";

fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn load_config(root: &Path) -> Result<EngineConfig> {
    match env::var(CONFIG_ENV) {
        Ok(path) => {
            let path = resolve(root, &path);
            EngineConfig::from_json_file(&path)
                .with_context(|| format!("reading configuration {}", path.display()))
        }
        Err(_) => {
            info!("{} not set, using default configuration", CONFIG_ENV);
            Ok(EngineConfig::default())
        }
    }
}

/// Member id, every engineered feature, the predicted score and its tier.
fn scored_feature_table(
    records: &[MemberRecord],
    builder: &FeatureBuilder,
    scores: &[f64],
    config: &EngineConfig,
) -> PolarsResult<DataFrame> {
    let vectors = builder.build_all(records);
    let mut columns = vec![Column::new(
        PlSmallStr::from("member_id"),
        vectors.iter().map(|v| v.member_id.clone()).collect::<Vec<_>>(),
    )];
    for (j, &name) in FEATURE_NAMES.iter().enumerate() {
        let values: Vec<f64> = vectors.iter().map(|v| v.values[j]).collect();
        columns.push(Column::new(PlSmallStr::from(name), values));
    }
    columns.push(Column::new(PlSmallStr::from("risk_score"), scores.to_vec()));
    let tiers: Vec<String> = scores
        .iter()
        .map(|&s| RiskTier::from_score(s, &config.tiers).to_string())
        .collect();
    columns.push(Column::new(PlSmallStr::from("risk_tier"), tiers));
    DataFrame::new(columns)
}

fn attribution_table(report: &CostDriverReport) -> PolarsResult<DataFrame> {
    let rows = &report.attribution_values;
    let mut columns = vec![
        Column::new(
            PlSmallStr::from("member_id"),
            rows.iter()
                .map(|a| a.member_id.clone().unwrap_or_default())
                .collect::<Vec<_>>(),
        ),
        Column::new(
            PlSmallStr::from("predicted_cost"),
            rows.iter().map(|a| a.predicted).collect::<Vec<_>>(),
        ),
        Column::new(
            PlSmallStr::from("baseline_cost"),
            rows.iter().map(|a| a.baseline).collect::<Vec<_>>(),
        ),
    ];
    for feature in &report.cost_drivers.features {
        let values: Vec<f64> = rows
            .iter()
            .map(|a| a.contributions.get(feature).copied().unwrap_or(0.0))
            .collect();
        columns.push(Column::new(PlSmallStr::from(feature.as_str()), values));
    }
    DataFrame::new(columns)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the risk adjustment pipeline");

    let root = project_root();
    let config = load_config(&root)?;
    let mut args = env::args().skip(1);
    let claims_path = resolve(&root, &args.next().unwrap_or_else(|| DEFAULT_CLAIMS.to_string()));
    let output_dir = resolve(&root, &args.next().unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()));
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    // Load and clean the claims extract
    let df = ClaimsDataset {
        path: claims_path.to_string_lossy().into_owned(),
    }
    .load()?;
    let mapper = ConditionMapper::standard();
    let processor = ClaimsProcessor::new(mapper);
    let (records, quality) = processor.process(&df)?;
    if !quality.is_clean() {
        warn!(
            "{} of {} rows dropped during cleaning",
            quality.dropped_rows(),
            quality.input_rows
        );
    }
    let summary = processor.summary(&records);
    info!(
        "{} members, mean cost {:.2}, median {:.2}",
        summary.unique_members, summary.cost_mean, summary.cost_median
    );

    // Risk model
    let mut trainer = RiskEnsembleTrainer::new(mapper, config.trainer.clone());
    let training = trainer.train_records(&records)?;
    info!(
        "Risk model: {} (mean R² {:.4}, best fold {:.4}, {} folds)",
        training.best_family, training.mean_r2, training.best_r2, training.n_folds
    );
    let artifact = trainer.artifact().context("trainer holds no artifact after training")?;
    fs::write(output_dir.join("risk_model.json"), artifact.to_bytes()?)?;

    let scores = trainer.predict_batch(&records)?;
    let builder = FeatureBuilder::new(mapper).with_thresholds(artifact.thresholds);
    let mut features = scored_feature_table(&records, &builder, &scores, &config)?;
    let features_path = output_dir.join("member_features.csv");
    dataframe_to_csv(&mut features, &features_path.to_string_lossy())?;
    info!("Scored features written to {}", features_path.display());

    // Cost drivers
    let mut analyzer = CostDriverAnalyzer::new(mapper, config.analyzer.clone());
    let report = analyzer.analyze_records(&records)?;
    for insight in &report.insights {
        info!("insight: {}", insight);
    }
    let mut attributions = attribution_table(&report)?;
    dataframe_to_csv(
        &mut attributions,
        &output_dir.join("cost_attributions.csv").to_string_lossy(),
    )?;

    serde_json::to_writer_pretty(
        fs::File::create(output_dir.join("training_report.json"))?,
        &training,
    )?;
    serde_json::to_writer_pretty(
        fs::File::create(output_dir.join("cost_driver_report.json"))?,
        &report,
    )?;
    serde_json::to_writer_pretty(
        fs::File::create(output_dir.join("data_quality.json"))?,
        &quality,
    )?;
    info!("Reports written to {}", output_dir.display());

    Ok(())
}
