use crate::domain::analyze::{HoldingConstraint, HoldingInput};
use crate::domain::decision::PortfolioValidation;

const WEIGHT_SUM_MIN: f64 = 0.98;
const WEIGHT_SUM_MAX: f64 = 1.02;
const CONCENTRATION_LIMIT: f64 = 0.25;

/// Sanity checks on the holdings set before any reasoning call is paid for.
/// Errors block the pipeline; warnings ride along on the result.
pub fn validate_portfolio_reality(
    holdings: &[HoldingInput],
    allow_weight_override: bool,
) -> PortfolioValidation {
    let weight_sum: f64 = holdings.iter().map(|h| h.weight.unwrap_or(0.0)).sum();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut suspicious_weight_rows = Vec::new();

    let provided_weight_count = holdings.iter().filter(|h| h.weight.is_some()).count();
    if provided_weight_count > 0 {
        let out_of_bounds = !(WEIGHT_SUM_MIN..=WEIGHT_SUM_MAX).contains(&weight_sum);
        if out_of_bounds && !allow_weight_override {
            errors.push(format!(
                "Weight sum is {:.2}%. It must be between 98% and 102%.",
                weight_sum * 100.0
            ));
        }
        if out_of_bounds && allow_weight_override {
            warnings.push(format!(
                "Weight sum is {:.2}% (override enabled).",
                weight_sum * 100.0
            ));
        }
    } else {
        warnings.push(
            "No explicit weights provided. Equal-weighting will be used for scoring.".to_string(),
        );
    }

    for holding in holdings {
        if holding.weight.unwrap_or(0.0) > CONCENTRATION_LIMIT {
            warnings.push(format!(
                "Holding {} is above 25%. Confirm this concentration is intentional.",
                holding.name
            ));
        }
        if let Some(weight) = holding.weight {
            // A weight like 40 with siblings present almost certainly meant 40%.
            if weight > 1.0 && weight < 99.0 && holdings.len() > 1 {
                suspicious_weight_rows.push(holding.name.clone());
            }
        }
    }
    if !suspicious_weight_rows.is_empty() {
        warnings.push(
            "Suspicious weights detected. These look like percent values but should be decimals."
                .to_string(),
        );
    }

    let actionable_weight: f64 = holdings
        .iter()
        .filter(|h| h.constraint == HoldingConstraint::Free)
        .map(|h| h.weight.unwrap_or(0.0))
        .sum();
    if actionable_weight <= 0.0 {
        warnings.push("No FREE capital detected; recommendations may be non-actionable.".to_string());
    }

    PortfolioValidation {
        weight_sum,
        warnings,
        errors,
        actionable_weight,
        suspicious_weight_rows,
    }
}
