use crate::domain::contract::{AnalysisModelOutput, EffectLayer, ImpactDirection};
use crate::domain::decision::{Branch, LagBand, NodeShock, ShockDirection, ShockStrength};
use crate::text::node_key_from_description;

const MAX_NODE_LABEL: usize = 180;
const EFFECTS_PER_LAYER: usize = 3;

fn strength_from_layer(layer: EffectLayer) -> ShockStrength {
    match layer {
        EffectLayer::First => ShockStrength::Strong,
        EffectLayer::Second => ShockStrength::Med,
        EffectLayer::Third | EffectLayer::Fourth => ShockStrength::Weak,
    }
}

fn lag_from_layer(layer: EffectLayer) -> LagBand {
    match layer {
        EffectLayer::First => LagBand::Immediate,
        EffectLayer::Second => LagBand::M3To6,
        EffectLayer::Third => LagBand::M6To18,
        EffectLayer::Fourth => LagBand::M18Plus,
    }
}

/// Expands the qualitative causal chain into quantified per-branch,
/// per-node shocks. Deterministic given the model output and branch set, so
/// a rerun over the same snapshot reproduces the same records.
pub fn build_node_shocks(output: &AnalysisModelOutput, branches: &[Branch]) -> Vec<NodeShock> {
    let mut shocks = Vec::new();
    for branch in branches {
        for (layer, effects) in output.effects_by_layer.layers() {
            for effect in effects.iter().take(EFFECTS_PER_LAYER) {
                let direction = match effect.impact_direction {
                    ImpactDirection::Pos => ShockDirection::Up,
                    ImpactDirection::Neg => ShockDirection::Down,
                    ImpactDirection::Mixed | ImpactDirection::Uncertain => ShockDirection::Flat,
                };
                let base_magnitude = if effect.impact_direction == ImpactDirection::Uncertain {
                    0.02
                } else {
                    0.08
                };
                let branch_multiplier = match branch.name {
                    crate::domain::analyze::BranchName::Bull => 1.2,
                    crate::domain::analyze::BranchName::Bear => 1.4,
                    crate::domain::analyze::BranchName::Base => 1.0,
                };
                let sign = match direction {
                    ShockDirection::Up => 1.0,
                    ShockDirection::Down => -1.0,
                    ShockDirection::Flat => 0.0,
                };

                shocks.push(NodeShock {
                    branch_name: branch.name,
                    node_key: node_key_from_description(&effect.description),
                    node_label: effect.description.chars().take(MAX_NODE_LABEL).collect(),
                    direction,
                    magnitude_pct: sign * base_magnitude * branch_multiplier,
                    strength: strength_from_layer(layer),
                    lag: lag_from_layer(layer),
                    confidence: effect.confidence,
                    evidence_note: format!("Derived from {}-order effect chain.", layer.as_str()),
                });
            }
        }
    }
    shocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::branches::normalize_branch_probabilities;
    use crate::domain::analyze::BranchName;
    use crate::domain::contract::{CausalEffect, Confidence, EffectsByLayer};

    fn effect(description: &str, direction: ImpactDirection) -> CausalEffect {
        CausalEffect {
            description: description.to_string(),
            impact_direction: direction,
            confidence: Confidence::Med,
        }
    }

    fn output(first: Vec<CausalEffect>, second: Vec<CausalEffect>) -> AnalysisModelOutput {
        AnalysisModelOutput {
            effects_by_layer: EffectsByLayer {
                first,
                second,
                third: Vec::new(),
                fourth: Vec::new(),
            },
            assumptions: Vec::new(),
            leading_indicators: Vec::new(),
            holding_mappings: Vec::new(),
            asset_recommendations: Vec::new(),
        }
    }

    #[test]
    fn one_shock_per_branch_and_effect_capped_at_three() {
        let out = output(
            vec![
                effect("a", ImpactDirection::Pos),
                effect("b", ImpactDirection::Neg),
                effect("c", ImpactDirection::Pos),
                effect("d", ImpactDirection::Pos),
            ],
            vec![effect("e", ImpactDirection::Pos)],
        );
        let branches = normalize_branch_probabilities(&[]);
        let shocks = build_node_shocks(&out, &branches);
        // 3 branches x (3 capped first-order + 1 second-order).
        assert_eq!(shocks.len(), 12);
    }

    #[test]
    fn magnitudes_follow_direction_and_branch() {
        let out = output(
            vec![
                effect("rates up", ImpactDirection::Pos),
                effect("credit down", ImpactDirection::Neg),
                effect("murky", ImpactDirection::Uncertain),
            ],
            Vec::new(),
        );
        let branches = normalize_branch_probabilities(&[]);
        let shocks = build_node_shocks(&out, &branches);

        let find = |branch: BranchName, key: &str| {
            shocks
                .iter()
                .find(|s| s.branch_name == branch && s.node_key == key)
                .unwrap()
        };

        assert_eq!(find(BranchName::Base, "rates up").magnitude_pct, 0.08);
        assert_eq!(find(BranchName::Bull, "rates up").magnitude_pct, 0.08 * 1.2);
        assert_eq!(find(BranchName::Bear, "credit down").magnitude_pct, -0.08 * 1.4);

        let murky = find(BranchName::Base, "murky");
        assert_eq!(murky.direction, ShockDirection::Flat);
        assert_eq!(murky.magnitude_pct, 0.0);
    }

    #[test]
    fn strength_and_lag_track_the_layer() {
        let mut out = output(
            vec![effect("a", ImpactDirection::Pos)],
            vec![effect("b", ImpactDirection::Pos)],
        );
        out.effects_by_layer.third = vec![effect("c", ImpactDirection::Pos)];
        out.effects_by_layer.fourth = vec![effect("d", ImpactDirection::Pos)];

        let branches = vec![Branch {
            name: BranchName::Base,
            probability: 1.0,
            rationale: String::new(),
        }];
        let shocks = build_node_shocks(&out, &branches);
        assert_eq!(shocks.len(), 4);
        assert_eq!(shocks[0].strength, ShockStrength::Strong);
        assert_eq!(shocks[0].lag, LagBand::Immediate);
        assert_eq!(shocks[1].strength, ShockStrength::Med);
        assert_eq!(shocks[1].lag, LagBand::M3To6);
        assert_eq!(shocks[2].strength, ShockStrength::Weak);
        assert_eq!(shocks[2].lag, LagBand::M6To18);
        assert_eq!(shocks[3].strength, ShockStrength::Weak);
        assert_eq!(shocks[3].lag, LagBand::M18Plus);
        assert!(shocks[1].evidence_note.contains("second-order"));
    }

    #[test]
    fn empty_description_falls_back_to_macro_node() {
        let out = output(vec![effect("!!!", ImpactDirection::Pos)], Vec::new());
        let branches = vec![Branch {
            name: BranchName::Base,
            probability: 1.0,
            rationale: String::new(),
        }];
        let shocks = build_node_shocks(&out, &branches);
        assert_eq!(shocks[0].node_key, "macro-node");
    }
}
