use crate::domain::analyze::HoldingInput;
use crate::text::{clamp_text, normalize_text_key};
use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// Declared max lengths for the free-text fields of the reasoning output.
// The prompt states them and sanitize() enforces them.
pub const MAX_EFFECT_DESCRIPTION: usize = 500;
pub const MAX_HOLDING_NAME: usize = 120;
pub const MAX_EXPOSURE_TYPE: usize = 220;
pub const MAX_MECHANISM: usize = 900;
pub const MAX_ASSUMPTION: usize = 300;
pub const MAX_BREAKPOINT_SIGNAL: usize = 300;
pub const MAX_INDICATOR_NAME: usize = 120;
pub const MAX_INDICATOR_RATIONALE: usize = 300;
pub const MAX_ASSET_NAME: usize = 120;
pub const MAX_ASSET_CATEGORY: usize = 80;
pub const MAX_ASSET_ACTION: usize = 40;
pub const MAX_ASSET_RATIONALE: usize = 300;
pub const MAX_ASSET_MECHANISM: usize = 500;
pub const MAX_ASSET_TIME_HORIZON: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactDirection {
    Pos,
    Neg,
    Mixed,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Med,
    High,
}

/// Causal layers in decreasing directness and increasing lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectLayer {
    First,
    Second,
    Third,
    Fourth,
}

impl EffectLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectLayer::First => "first",
            EffectLayer::Second => "second",
            EffectLayer::Third => "third",
            EffectLayer::Fourth => "fourth",
        }
    }
}

/// Layers an asset recommendation may be sourced from. First-order effects
/// are portfolio-mapping territory, not recommendation territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceLayer {
    Second,
    Third,
    Fourth,
}

impl SourceLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLayer::Second => "SECOND",
            SourceLayer::Third => "THIRD",
            SourceLayer::Fourth => "FOURTH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalEffect {
    pub description: String,
    pub impact_direction: ImpactDirection,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectsByLayer {
    #[serde(default)]
    pub first: Vec<CausalEffect>,
    #[serde(default)]
    pub second: Vec<CausalEffect>,
    #[serde(default)]
    pub third: Vec<CausalEffect>,
    #[serde(default)]
    pub fourth: Vec<CausalEffect>,
}

impl EffectsByLayer {
    pub fn layers(&self) -> [(EffectLayer, &[CausalEffect]); 4] {
        [
            (EffectLayer::First, self.first.as_slice()),
            (EffectLayer::Second, self.second.as_slice()),
            (EffectLayer::Third, self.third.as_slice()),
            (EffectLayer::Fourth, self.fourth.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumption {
    pub assumption: String,
    pub breakpoint_signal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadingIndicator {
    pub name: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingMapping {
    pub holding_name: String,
    pub exposure_type: String,
    pub net_impact: ImpactDirection,
    pub mechanism: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecommendation {
    pub asset_name: String,
    pub asset_category: String,
    pub source_layer: SourceLayer,
    pub direction: ImpactDirection,
    pub action: String,
    pub rationale: String,
    pub confidence: Confidence,
    pub mechanism: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_horizon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisModelOutput {
    pub effects_by_layer: EffectsByLayer,
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
    #[serde(default)]
    pub leading_indicators: Vec<LeadingIndicator>,
    #[serde(default)]
    pub holding_mappings: Vec<HoldingMapping>,
    #[serde(default)]
    pub asset_recommendations: Vec<AssetRecommendation>,
}

impl AnalysisModelOutput {
    /// Whitespace-compacts and hard-truncates every free-text field to its
    /// declared maximum. Runs before any dedupe or invariant check so all
    /// downstream keys see canonicalized text.
    pub fn sanitize(mut self) -> Self {
        let clamp_effects = |effects: &mut Vec<CausalEffect>| {
            for effect in effects {
                effect.description = clamp_text(&effect.description, MAX_EFFECT_DESCRIPTION);
            }
        };
        clamp_effects(&mut self.effects_by_layer.first);
        clamp_effects(&mut self.effects_by_layer.second);
        clamp_effects(&mut self.effects_by_layer.third);
        clamp_effects(&mut self.effects_by_layer.fourth);

        for assumption in &mut self.assumptions {
            assumption.assumption = clamp_text(&assumption.assumption, MAX_ASSUMPTION);
            assumption.breakpoint_signal =
                clamp_text(&assumption.breakpoint_signal, MAX_BREAKPOINT_SIGNAL);
        }
        for indicator in &mut self.leading_indicators {
            indicator.name = clamp_text(&indicator.name, MAX_INDICATOR_NAME);
            indicator.rationale = clamp_text(&indicator.rationale, MAX_INDICATOR_RATIONALE);
        }
        for mapping in &mut self.holding_mappings {
            mapping.holding_name = clamp_text(&mapping.holding_name, MAX_HOLDING_NAME);
            mapping.exposure_type = clamp_text(&mapping.exposure_type, MAX_EXPOSURE_TYPE);
            mapping.mechanism = clamp_text(&mapping.mechanism, MAX_MECHANISM);
        }
        for rec in &mut self.asset_recommendations {
            rec.asset_name = clamp_text(&rec.asset_name, MAX_ASSET_NAME);
            rec.asset_category = clamp_text(&rec.asset_category, MAX_ASSET_CATEGORY);
            rec.action = clamp_text(&rec.action, MAX_ASSET_ACTION);
            rec.rationale = clamp_text(&rec.rationale, MAX_ASSET_RATIONALE);
            rec.mechanism = clamp_text(&rec.mechanism, MAX_ASSET_MECHANISM);
            rec.time_horizon = rec
                .time_horizon
                .take()
                .map(|t| clamp_text(&t, MAX_ASSET_TIME_HORIZON))
                .filter(|t| !t.is_empty());
        }
        self
    }

    /// Drops repeated effects within each layer, keyed by normalized
    /// description, keeping the first occurrence.
    pub fn dedupe_effects(mut self) -> Self {
        let dedupe_layer = |effects: &mut Vec<CausalEffect>| {
            let mut seen = BTreeSet::new();
            effects.retain(|effect| seen.insert(normalize_text_key(&effect.description)));
        };
        dedupe_layer(&mut self.effects_by_layer.first);
        dedupe_layer(&mut self.effects_by_layer.second);
        dedupe_layer(&mut self.effects_by_layer.third);
        dedupe_layer(&mut self.effects_by_layer.fourth);
        self
    }

    /// Keeps the first mapping per normalized holding name.
    pub fn dedupe_holding_mappings(mut self) -> Self {
        let mut seen = BTreeSet::new();
        self.holding_mappings
            .retain(|mapping| seen.insert(normalize_text_key(&mapping.holding_name)));
        self
    }

    /// Keeps the first recommendation per (normalized asset name, source
    /// layer, action) triple.
    pub fn dedupe_asset_recommendations(mut self) -> Self {
        let mut seen = BTreeSet::new();
        self.asset_recommendations.retain(|rec| {
            seen.insert((
                normalize_text_key(&rec.asset_name),
                rec.source_layer,
                rec.action.clone(),
            ))
        });
        self
    }

    /// Structural invariants the reasoning output must satisfy after the
    /// dedupe passes. Violations are retried exactly once upstream with a
    /// corrective hint built from these error messages.
    pub fn enforce_output_checks(&self, holdings: &[HoldingInput]) -> anyhow::Result<()> {
        ensure!(
            self.effects_by_layer.first.len() >= 2,
            "model output must include at least 2 first-order effects (got {})",
            self.effects_by_layer.first.len()
        );
        ensure!(
            self.effects_by_layer.second.len() >= 2,
            "model output must include at least 2 second-order effects (got {})",
            self.effects_by_layer.second.len()
        );

        let downstream_effects = self.effects_by_layer.second.len()
            + self.effects_by_layer.third.len()
            + self.effects_by_layer.fourth.len();
        ensure!(
            downstream_effects == 0 || !self.asset_recommendations.is_empty(),
            "model output must include at least one asset recommendation when second/third/fourth-order effects are present"
        );

        let mut mapping_counts = BTreeMap::<String, usize>::new();
        for mapping in &self.holding_mappings {
            *mapping_counts
                .entry(normalize_text_key(&mapping.holding_name))
                .or_insert(0) += 1;
        }

        let mut unique_keys = BTreeSet::new();
        for holding in holdings {
            let key = normalize_text_key(&holding.name);
            if !unique_keys.insert(key.clone()) {
                continue;
            }
            let count = mapping_counts.get(&key).copied().unwrap_or(0);
            if count != 1 {
                bail!(
                    "expected exactly one mapping for holding: {} (got {count})",
                    holding.name
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analyze::{HoldingConstraint, HoldingPurpose, Sensitivity};

    fn holding(name: &str) -> HoldingInput {
        HoldingInput {
            name: name.to_string(),
            ticker: None,
            weight: None,
            sensitivity: Sensitivity::Med,
            constraint: HoldingConstraint::Free,
            purpose: HoldingPurpose::LongTermGrowth,
            exposure_tags: Vec::new(),
        }
    }

    fn effect(description: &str, direction: ImpactDirection) -> CausalEffect {
        CausalEffect {
            description: description.to_string(),
            impact_direction: direction,
            confidence: Confidence::Med,
        }
    }

    fn mapping(holding_name: &str, net_impact: ImpactDirection) -> HoldingMapping {
        HoldingMapping {
            holding_name: holding_name.to_string(),
            exposure_type: "Compute".to_string(),
            net_impact,
            mechanism: "Capex cycle".to_string(),
            confidence: Confidence::Med,
        }
    }

    fn recommendation(asset_name: &str, source_layer: SourceLayer, action: &str) -> AssetRecommendation {
        AssetRecommendation {
            asset_name: asset_name.to_string(),
            asset_category: "ETF".to_string(),
            source_layer,
            direction: ImpactDirection::Pos,
            action: action.to_string(),
            rationale: "Captures higher compute demand.".to_string(),
            confidence: Confidence::High,
            mechanism: "Demand reroutes toward infra.".to_string(),
            time_horizon: None,
        }
    }

    fn base_output() -> AnalysisModelOutput {
        AnalysisModelOutput {
            effects_by_layer: EffectsByLayer {
                first: vec![
                    effect("A", ImpactDirection::Pos),
                    effect("B", ImpactDirection::Neg),
                ],
                second: vec![
                    effect("C", ImpactDirection::Pos),
                    effect("D", ImpactDirection::Neg),
                ],
                third: Vec::new(),
                fourth: Vec::new(),
            },
            assumptions: Vec::new(),
            leading_indicators: Vec::new(),
            holding_mappings: vec![mapping("Infra Fund", ImpactDirection::Pos)],
            asset_recommendations: vec![recommendation("AI Software ETF", SourceLayer::Second, "OVERWEIGHT")],
        }
    }

    #[test]
    fn dedupes_repeated_effects_by_normalized_text() {
        let mut output = base_output();
        output
            .effects_by_layer
            .first
            .push(effect("A!", ImpactDirection::Pos));
        let deduped = output.dedupe_effects();
        assert_eq!(deduped.effects_by_layer.first.len(), 2);
    }

    #[test]
    fn dedupe_never_increases_layer_length() {
        let output = base_output();
        let before = output.effects_by_layer.second.len();
        let deduped = output.dedupe_effects();
        assert!(deduped.effects_by_layer.second.len() <= before);
    }

    #[test]
    fn dedupes_asset_recommendations_by_triple() {
        let mut output = base_output();
        output.asset_recommendations = vec![
            recommendation("AI Software ETF", SourceLayer::Second, "OVERWEIGHT"),
            recommendation("AI Software ETF", SourceLayer::Second, "OVERWEIGHT"),
            recommendation("Nvidia", SourceLayer::Third, "WATCH"),
        ];
        let deduped = output.dedupe_asset_recommendations();
        assert_eq!(deduped.asset_recommendations.len(), 2);
    }

    #[test]
    fn same_asset_different_action_survives_dedupe() {
        let mut output = base_output();
        output.asset_recommendations = vec![
            recommendation("AI Software ETF", SourceLayer::Second, "OVERWEIGHT"),
            recommendation("AI Software ETF", SourceLayer::Second, "WATCH"),
        ];
        let deduped = output.dedupe_asset_recommendations();
        assert_eq!(deduped.asset_recommendations.len(), 2);
    }

    #[test]
    fn enforce_names_missing_holding() {
        let output = base_output();
        let err = output
            .enforce_output_checks(&[holding("Infra Fund"), holding("SaaS Fund")])
            .unwrap_err();
        assert!(err.to_string().contains("SaaS Fund"));
        assert!(err.to_string().contains("got 0"));
    }

    #[test]
    fn enforce_names_doubly_mapped_holding() {
        let mut output = base_output();
        output
            .holding_mappings
            .push(mapping("Infra Fund", ImpactDirection::Neg));
        let err = output.enforce_output_checks(&[holding("Infra Fund")]).unwrap_err();
        assert!(err.to_string().contains("Infra Fund"));
        assert!(err.to_string().contains("got 2"));
    }

    #[test]
    fn enforce_requires_recommendation_with_downstream_effects() {
        let mut output = base_output();
        output.asset_recommendations.clear();
        let err = output.enforce_output_checks(&[holding("Infra Fund")]).unwrap_err();
        assert!(err.to_string().contains("at least one asset recommendation"));
    }

    #[test]
    fn enforce_requires_two_first_order_effects() {
        let mut output = base_output();
        output.effects_by_layer.first.truncate(1);
        let err = output.enforce_output_checks(&[holding("Infra Fund")]).unwrap_err();
        assert!(err.to_string().contains("first-order"));
        assert!(err.to_string().contains("got 1"));
    }

    #[test]
    fn duplicate_holdings_need_one_mapping_after_dedupe() {
        let mut output = base_output();
        output
            .holding_mappings
            .push(mapping("Infra Fund", ImpactDirection::Neg));
        let deduped = output.dedupe_holding_mappings();
        assert_eq!(deduped.holding_mappings.len(), 1);
        deduped
            .enforce_output_checks(&[holding("Infra Fund"), holding("infra fund")])
            .unwrap();
    }

    #[test]
    fn sanitize_truncates_to_declared_maxima() {
        let mut output = base_output();
        output.holding_mappings[0].mechanism = "m".repeat(2000);
        output.effects_by_layer.first[0].description = format!("  spaced   out  {}", "d".repeat(600));
        let sanitized = output.sanitize();
        assert!(sanitized.holding_mappings[0].mechanism.chars().count() < MAX_MECHANISM);
        assert!(
            sanitized.effects_by_layer.first[0]
                .description
                .starts_with("spaced out")
        );
        assert!(
            sanitized.effects_by_layer.first[0].description.chars().count()
                < MAX_EFFECT_DESCRIPTION
        );
    }
}
