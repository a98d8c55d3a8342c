use crate::domain::contract::AnalysisModelOutput;
use crate::domain::decision::{IndicatorDefinition, IndicatorStatus, SupportsDirection};

const MAX_INDICATORS: usize = 5;

/// Coarse monitoring defaults for the first few leading indicators the
/// reasoning call surfaced, pending manual threshold tuning.
pub fn derive_indicator_definitions(output: &AnalysisModelOutput) -> Vec<IndicatorDefinition> {
    output
        .leading_indicators
        .iter()
        .take(MAX_INDICATORS)
        .map(|indicator| IndicatorDefinition {
            indicator_name: indicator.name.clone(),
            supports_direction: SupportsDirection::HigherSupports,
            green_threshold: 1.0,
            yellow_threshold: 0.0,
            red_threshold: -1.0,
            expected_window: "3-6 months".to_string(),
        })
        .collect()
}

/// Bands an observed value against a definition's thresholds; the
/// comparisons invert for indicators where lower readings support the
/// thesis.
pub fn classify_observed_value(
    observed_value: f64,
    definition: &IndicatorDefinition,
) -> IndicatorStatus {
    match definition.supports_direction {
        SupportsDirection::HigherSupports => {
            if observed_value >= definition.green_threshold {
                IndicatorStatus::Green
            } else if observed_value >= definition.yellow_threshold {
                IndicatorStatus::Yellow
            } else {
                IndicatorStatus::Red
            }
        }
        SupportsDirection::LowerSupports => {
            if observed_value <= definition.green_threshold {
                IndicatorStatus::Green
            } else if observed_value <= definition.yellow_threshold {
                IndicatorStatus::Yellow
            } else {
                IndicatorStatus::Red
            }
        }
    }
}
