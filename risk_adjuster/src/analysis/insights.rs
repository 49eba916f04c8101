//! Plain-language statements from a cost-driver run.

use crate::analysis::cost_drivers::{CostDrivers, VariationMetrics};
use crate::ensemble_cv::CvMetrics;

/// Above this std/mean ratio spend is called highly dispersed.
const HIGH_DISPERSION_CV: f64 = 1.0;
/// Overlap shares smaller than this are not worth a sentence.
const OVERLAP_NOTE_THRESHOLD: f64 = 0.05;

fn label(feature: &str) -> String {
    feature.replace('_', " ")
}

fn percent(share: f64) -> f64 {
    100.0 * share
}

pub fn generate_insights(
    drivers: &CostDrivers,
    variation: &VariationMetrics,
    metrics: &CvMetrics,
) -> Vec<String> {
    let mut insights = Vec::new();

    let strongest = variation
        .variance_share_by_feature
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1));
    if let Some((feature, share)) = strongest {
        if *share > 0.0 {
            insights.push(format!(
                "{} explains the largest share of cost variation ({:.1}% of variance on its own)",
                label(feature),
                percent(*share)
            ));
        }
    }

    if let Some(top) = drivers.top_drivers.first() {
        if top.importance > 0.0 {
            let direction = if top.correlation < 0.0 { "lower" } else { "higher" };
            insights.push(format!(
                "{} is the most important input to the {} cost model; higher values go with {} spend",
                label(&top.feature),
                metrics.best_family,
                direction
            ));
        } else {
            insights.push(
                "no feature improves on the population average cost; the data carry no usable cost signal"
                    .to_string(),
            );
        }
    }

    insights.push(format!(
        "the cost model explains {:.1}% of cost variance; {:.1}% is left unexplained",
        percent(variation.explained_share),
        percent(variation.residual_share)
    ));

    if variation.overlap_share > OVERLAP_NOTE_THRESHOLD {
        insights.push(format!(
            "{:.1}% of the explained variance comes from interactions no single feature accounts for",
            percent(variation.overlap_share)
        ));
    } else if variation.overlap_share < -OVERLAP_NOTE_THRESHOLD {
        insights.push(
            "features overlap heavily: their individual shares add up to more than the model explains"
                .to_string(),
        );
    }

    let dispersion = if variation.coefficient_of_variation > HIGH_DISPERSION_CV {
        "highly"
    } else {
        "moderately"
    };
    insights.push(format!(
        "member spend is {} dispersed (coefficient of variation {:.2}); the costliest 10% of members account for {:.1}% of total spend",
        dispersion,
        variation.coefficient_of_variation,
        percent(variation.top_decile_cost_share)
    ));

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cost_drivers::CostDriver;
    use crate::estimators::EstimatorFamily;
    use std::collections::BTreeMap;

    #[test]
    fn names_the_strongest_feature() {
        let drivers = CostDrivers {
            feature_importance: BTreeMap::new(),
            correlations: BTreeMap::new(),
            features: vec![],
            correlation_matrix: vec![],
            top_drivers: vec![CostDriver {
                feature: "chronic_condition_count".into(),
                importance: 0.6,
                correlation: 0.8,
            }],
        };
        let variation = VariationMetrics {
            total_variance: 1.0,
            variance_share_by_feature: [("age".to_string(), 0.1), ("chronic_condition_count".to_string(), 0.64)]
                .into_iter()
                .collect(),
            explained_share: 0.7,
            overlap_share: -0.04,
            residual_share: 0.3,
            coefficient_of_variation: 1.4,
            top_decile_cost_share: 0.45,
        };
        let metrics = CvMetrics {
            best_family: EstimatorFamily::GradientBoosting,
            mean_r2: 0.6,
            best_r2: 0.7,
            n_folds: 5,
            fold_scores: vec![0.6; 5],
            candidate_scores: BTreeMap::new(),
        };
        let insights = generate_insights(&drivers, &variation, &metrics);
        assert!(insights[0].starts_with("chronic condition count explains the largest share of cost variation"));
        assert!(insights[1].contains("gradient_boosting"));
        assert!(insights.iter().any(|s| s.contains("highly dispersed")));
        assert!(insights.iter().any(|s| s.contains("45.0% of total spend")));
        assert_eq!(insights.len(), 4);
    }
}
