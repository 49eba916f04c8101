//! Claims-based member risk adjustment and cost-driver analysis.

pub mod analysis;
pub mod config;
pub mod data_handling;
pub mod ensemble_cv;
pub mod estimators;
pub mod features;
pub mod hcc_mapping;
pub mod helper_functions;
pub mod models;
pub mod risk_model;

#[cfg(test)]
mod test_fixtures;
