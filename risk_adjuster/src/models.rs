use polars::prelude::*;
use thiserror::Error;

/// Anything that can hand the engine a claims table.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

#[derive(Debug, Error)]
pub enum RiskError {
    /// Required column missing, null, or of the wrong shape. Fatal for the call.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("insufficient data: {found} usable records, at least {required} required")]
    InsufficientData { found: usize, required: usize },

    /// Prediction, importance or attribution requested before a successful fit.
    #[error("model has not been trained")]
    NotTrained,

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("dataframe error: {0}")]
    Polars(#[from] PolarsError),

    #[error("linear algebra error: {0}")]
    Linalg(#[from] linfa_linalg::LinalgError),

    #[error("model fitting error: {0}")]
    Fit(#[from] linfa_linear::LinearError<f64>),

    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RiskResult<T> = Result<T, RiskError>;

pub fn schema_err(msg: impl Into<String>) -> RiskError {
    RiskError::Schema(msg.into())
}
