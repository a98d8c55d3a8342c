use crate::domain::analyze::{AnalyzeRequest, HoldingInput, Sensitivity};
use crate::domain::contract::{AnalysisModelOutput, Confidence, HoldingMapping, ImpactDirection};
use crate::text::normalize_text_key;
use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Fixed weight tables. These are part of the scoring contract and are never
// tuned at runtime.
pub fn impact_weight(direction: ImpactDirection) -> f64 {
    match direction {
        ImpactDirection::Pos => 1.0,
        ImpactDirection::Neg => -1.0,
        ImpactDirection::Mixed | ImpactDirection::Uncertain => 0.0,
    }
}

pub fn confidence_weight(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::Low => 0.4,
        Confidence::Med => 0.7,
        Confidence::High => 1.0,
    }
}

fn sensitivity_weight(sensitivity: Sensitivity) -> f64 {
    match sensitivity {
        Sensitivity::Low => 0.5,
        Sensitivity::Med => 0.8,
        Sensitivity::High => 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasLabel {
    StrongNeg,
    Neg,
    Neutral,
    Pos,
    StrongPos,
}

impl BiasLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasLabel::StrongNeg => "STRONG_NEG",
            BiasLabel::Neg => "NEG",
            BiasLabel::Neutral => "NEUTRAL",
            BiasLabel::Pos => "POS",
            BiasLabel::StrongPos => "STRONG_POS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingContribution {
    pub holding_name: String,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioBias {
    pub contributions: Vec<HoldingContribution>,
    pub portfolio_bias: f64,
    pub bias_label: BiasLabel,
}

/// Equal weight when nothing is explicit, otherwise renormalized to sum 1.
pub fn normalize_weights(holdings: &[HoldingInput]) -> anyhow::Result<Vec<f64>> {
    ensure!(!holdings.is_empty(), "at least one holding is required");

    let has_any_weight = holdings.iter().any(|h| h.weight.is_some());
    if !has_any_weight {
        let w = 1.0 / holdings.len() as f64;
        return Ok(vec![w; holdings.len()]);
    }

    let raw: Vec<f64> = holdings.iter().map(|h| h.weight.unwrap_or(0.0)).collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        bail!("provided holding weights sum to zero");
    }
    Ok(raw.iter().map(|w| w / total).collect())
}

/// Five contiguous bands over [-1, 1].
pub fn bias_label_from_score(score: f64) -> BiasLabel {
    if score <= -0.6 {
        BiasLabel::StrongNeg
    } else if score <= -0.2 {
        BiasLabel::Neg
    } else if score < 0.2 {
        BiasLabel::Neutral
    } else if score < 0.6 {
        BiasLabel::Pos
    } else {
        BiasLabel::StrongPos
    }
}

/// Reduces holdings plus validated mappings into a single scalar in [-1, 1]
/// with per-holding contributions. Requires exactly one mapping per holding
/// (the orchestrator guarantees this; a miss here is a structural bug).
pub fn compute_portfolio_bias(
    request: &AnalyzeRequest,
    output: &AnalysisModelOutput,
) -> anyhow::Result<PortfolioBias> {
    let weights = normalize_weights(&request.holdings)?;

    let mapping_by_holding: BTreeMap<String, &HoldingMapping> = output
        .holding_mappings
        .iter()
        .map(|m| (normalize_text_key(&m.holding_name), m))
        .collect();

    let mut contributions = Vec::with_capacity(request.holdings.len());
    for (holding, weight) in request.holdings.iter().zip(weights) {
        let Some(mapping) = mapping_by_holding.get(&normalize_text_key(&holding.name)) else {
            bail!("missing mapping for holding {}", holding.name);
        };

        let score = impact_weight(mapping.net_impact)
            * confidence_weight(mapping.confidence)
            * sensitivity_weight(holding.sensitivity)
            * request.probability
            * weight;

        contributions.push(HoldingContribution {
            holding_name: holding.name.clone(),
            score,
            weight,
        });
    }

    let raw_bias: f64 = contributions.iter().map(|c| c.score).sum();
    let portfolio_bias = raw_bias.clamp(-1.0, 1.0);

    Ok(PortfolioBias {
        contributions,
        portfolio_bias,
        bias_label: bias_label_from_score(portfolio_bias),
    })
}
