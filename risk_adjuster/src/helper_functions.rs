use std::env;
use std::path::PathBuf;

use polars::prelude::*;
use statrs::statistics::Statistics;

use crate::models::{schema_err, RiskResult};

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

pub fn read_csv(file_path: &str) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

pub fn dataframe_to_csv(df: &mut DataFrame, path: &str) -> PolarsResult<()> {
    let mut file = std::fs::File::create(path)?;
    CsvWriter::new(&mut file).finish(df)?;
    Ok(())
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> RiskResult<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !has_column(df, c))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(schema_err(format!("missing required columns: {:?}", missing)))
    }
}

/// Column values as `f64`, casting integer/boolean/string columns. Unparseable cells become `None`.
pub fn f64_column(df: &DataFrame, name: &str) -> RiskResult<Vec<Option<f64>>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

pub fn str_column(df: &DataFrame, name: &str) -> RiskResult<Vec<Option<String>>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|opt| opt.map(|s| s.trim().to_string()))
        .collect())
}

/// Coefficient of determination; a constant target scores 1.0 when matched exactly and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let mean = y_true.iter().mean();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Population variance (ddof = 0); zero for fewer than two values.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().population_variance()
}
