use crate::domain::analyze::BranchName;
use crate::domain::decision::{Branch, DecisionSummary, ExpressionRecommendation, IndicatorDefinition};
use serde::{Deserialize, Serialize};

const TOP_N: usize = 3;
const ACTION_FILLER: &str = "No additional actionable change required.";
const MONITOR_FILLER: &str = "Monitor thesis coherence versus branch probabilities.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchImpact {
    pub branch_name: BranchName,
    pub score: f64,
}

/// Each branch's contribution to the bias, tilted off the base score.
pub fn branch_impacts(portfolio_bias: f64, branches: &[Branch]) -> Vec<BranchImpact> {
    branches
        .iter()
        .map(|branch| BranchImpact {
            branch_name: branch.name,
            score: portfolio_bias
                * match branch.name {
                    BranchName::Bull => 0.8,
                    BranchName::Bear => 1.2,
                    BranchName::Base => 1.0,
                },
        })
        .collect()
}

// Nearest-rank on the sorted sample set, no interpolation. The 3-point
// spread per branch is a deliberate simplification kept for reproducibility.
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = (((sorted.len() - 1) as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Compresses branch impacts, recommendations and indicators into the short
/// decision brief: a p10/p50/p90 impact spread, up to three actions, three
/// monitors and three fixed change-my-mind triggers.
pub fn build_decision_summary(
    impacts: &[BranchImpact],
    recommendations: &[ExpressionRecommendation],
    indicators: &[IndicatorDefinition],
) -> DecisionSummary {
    let samples: Vec<f64> = impacts
        .iter()
        .flat_map(|x| [x.score * 0.8, x.score, x.score * 1.2])
        .collect();

    let mut top_actions: Vec<String> = recommendations
        .iter()
        .filter(|r| r.actionable)
        .take(TOP_N)
        .map(|r| {
            format!(
                "{} {} ({:.1}% max)",
                r.action,
                r.symbol,
                r.max_position_pct * 100.0
            )
        })
        .collect();
    while top_actions.len() < TOP_N {
        top_actions.push(ACTION_FILLER.to_string());
    }

    let mut top_monitors: Vec<String> = indicators
        .iter()
        .take(TOP_N)
        .map(|i| i.indicator_name.clone())
        .collect();
    while top_monitors.len() < TOP_N {
        top_monitors.push(MONITOR_FILLER.to_string());
    }

    DecisionSummary {
        portfolio_impact_p10: percentile(&samples, 0.1),
        portfolio_impact_p50: percentile(&samples, 0.5),
        portfolio_impact_p90: percentile(&samples, 0.9),
        top_actions,
        top_monitors,
        change_my_mind: vec![
            "Branch probabilities diverge materially from observed indicators.".to_string(),
            "Core second-order assumptions fail for two review cycles.".to_string(),
            "Portfolio impact distribution re-centers near neutral.".to_string(),
        ],
    }
}
