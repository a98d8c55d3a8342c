use crate::domain::analyze::{HoldingConstraint, HoldingInput};
use crate::domain::decision::{
    Branch, ExpressionRecommendation, LagBand, NodeShock, RecommendationDirection, SizingBand,
    UniverseRow,
};
use crate::scoring::confidence_weight;
use crate::text::{exposure_factor_key, normalize_text_key};
use std::collections::BTreeSet;

const LARGE_THRESHOLD: f64 = 0.06;
const MEDIUM_THRESHOLD: f64 = 0.03;
const SHORT_HORIZON_MONTHS: i32 = 12;
const SHORT_HORIZON_LONG_LAG_WEIGHT: f64 = 0.4;
const FREE_WEIGHT_CAP_SHARE: f64 = 0.05;
const MAX_LONGS: usize = 4;
const MAX_SHORTS: usize = 3;

fn lag_weight(lag: LagBand) -> f64 {
    match lag {
        LagBand::Immediate => 1.0,
        LagBand::M3To6 => 0.9,
        LagBand::M6To18 => 0.75,
        LagBand::M18Plus => 0.6,
    }
}

fn base_cap(band: SizingBand) -> f64 {
    match band {
        SizingBand::Large => 0.05,
        SizingBand::Medium => 0.025,
        SizingBand::Small => 0.01,
    }
}

fn sizing_band(abs_score: f64) -> SizingBand {
    if abs_score >= LARGE_THRESHOLD {
        SizingBand::Large
    } else if abs_score >= MEDIUM_THRESHOLD {
        SizingBand::Medium
    } else {
        SizingBand::Small
    }
}

/// Scores every universe row against branch-weighted node shocks and returns
/// a fixed-size long/short shortlist: top 4 positive scores descending plus
/// top 3 negative scores ascending (most negative first).
pub fn build_expression_recommendations(
    branches: &[Branch],
    node_shocks: &[NodeShock],
    universe_rows: &[UniverseRow],
    holdings: &[HoldingInput],
    horizon_months: i32,
) -> Vec<ExpressionRecommendation> {
    let holding_keys: BTreeSet<String> = holdings
        .iter()
        .map(|h| {
            let combined = format!("{} {}", h.ticker.as_deref().unwrap_or(""), h.name);
            normalize_text_key(combined.trim())
        })
        .collect();

    let actionable_free_weight: f64 = holdings
        .iter()
        .filter(|h| h.constraint == HoldingConstraint::Free)
        .map(|h| h.weight.unwrap_or(0.0))
        .sum();

    let mut scored: Vec<ExpressionRecommendation> = universe_rows
        .iter()
        .map(|row| {
            let mut score = 0.0;
            for branch in branches {
                for shock in node_shocks.iter().filter(|s| s.branch_name == branch.name) {
                    let beta = row
                        .exposure_vector
                        .get(&exposure_factor_key(&shock.node_key))
                        .copied()
                        .unwrap_or(0.0);
                    // Long-lag effects are discounted further for short-horizon requests.
                    let lag_adj = if horizon_months <= SHORT_HORIZON_MONTHS
                        && shock.lag == LagBand::M18Plus
                    {
                        SHORT_HORIZON_LONG_LAG_WEIGHT
                    } else {
                        lag_weight(shock.lag)
                    };
                    score += branch.probability
                        * shock.magnitude_pct
                        * beta
                        * confidence_weight(shock.confidence)
                        * lag_adj;
                }
            }

            let direction = if score >= 0.0 {
                RecommendationDirection::Pos
            } else {
                RecommendationDirection::Neg
            };
            let band = sizing_band(score.abs());

            let base = base_cap(band);
            let free_cap = if actionable_free_weight > 0.0 {
                actionable_free_weight * FREE_WEIGHT_CAP_SHARE
            } else {
                base
            };
            let max_position_pct = base.min(free_cap).min(row.max_position_default_pct);

            let already_expressed = holding_keys.contains(&normalize_text_key(&row.symbol))
                || holding_keys.contains(&normalize_text_key(&row.company_name));
            let actionable = actionable_free_weight > 0.0 && !already_expressed;

            ExpressionRecommendation {
                symbol: row.symbol.clone(),
                name: row.company_name.clone(),
                asset_type: row.asset_type,
                direction,
                action: if direction == RecommendationDirection::Pos {
                    "OVERWEIGHT".to_string()
                } else {
                    "UNDERWEIGHT".to_string()
                },
                sizing_band: band,
                max_position_pct,
                score,
                mechanism: "Exposure vector aligns with branch-weighted node shocks.".to_string(),
                catalyst_window: if horizon_months <= SHORT_HORIZON_MONTHS {
                    "0-12 months".to_string()
                } else {
                    "12-36 months".to_string()
                },
                priced_in_note: "Assess valuation and crowding before execution.".to_string(),
                risk_note: "Model relies on simplified exposure vectors and manual tagging."
                    .to_string(),
                invalidation_trigger:
                    "Primary node shocks fail to materialize for two consecutive review cycles."
                        .to_string(),
                portfolio_role: if direction == RecommendationDirection::Pos {
                    "core".to_string()
                } else {
                    "hedge".to_string()
                },
                actionable,
                already_expressed,
            }
        })
        .collect();

    let mut longs: Vec<ExpressionRecommendation> = scored
        .iter()
        .filter(|r| r.direction == RecommendationDirection::Pos)
        .cloned()
        .collect();
    longs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    longs.truncate(MAX_LONGS);

    scored.retain(|r| r.direction == RecommendationDirection::Neg);
    scored.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_SHORTS);

    longs.extend(scored);
    longs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analyze::{BranchName, HoldingPurpose, Sensitivity};
    use crate::domain::contract::Confidence;
    use crate::domain::decision::{AssetType, ShockDirection, ShockStrength};
    use std::collections::BTreeMap;

    fn branch(name: BranchName, probability: f64) -> Branch {
        Branch {
            name,
            probability,
            rationale: String::new(),
        }
    }

    fn shock(branch_name: BranchName, node_key: &str, magnitude_pct: f64, lag: LagBand) -> NodeShock {
        NodeShock {
            branch_name,
            node_key: node_key.to_string(),
            node_label: node_key.to_string(),
            direction: if magnitude_pct >= 0.0 {
                ShockDirection::Up
            } else {
                ShockDirection::Down
            },
            magnitude_pct,
            strength: ShockStrength::Med,
            lag,
            confidence: Confidence::High,
            evidence_note: String::new(),
        }
    }

    fn row(symbol: &str, exposures: &[(&str, f64)]) -> UniverseRow {
        UniverseRow {
            symbol: symbol.to_string(),
            company_name: format!("{symbol} Inc"),
            asset_type: AssetType::Equity,
            region: None,
            currency: None,
            liquidity_class: "daily".to_string(),
            max_position_default_pct: 0.05,
            tags: Vec::new(),
            exposure_vector: exposures
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn free_holding(name: &str, ticker: Option<&str>, weight: f64) -> HoldingInput {
        HoldingInput {
            name: name.to_string(),
            ticker: ticker.map(|t| t.to_string()),
            weight: Some(weight),
            sensitivity: Sensitivity::Med,
            constraint: HoldingConstraint::Free,
            purpose: HoldingPurpose::LongTermGrowth,
            exposure_tags: Vec::new(),
        }
    }

    #[test]
    fn zero_exposure_scores_exactly_zero_small_pos() {
        let branches = vec![branch(BranchName::Base, 1.0)];
        let shocks = vec![shock(BranchName::Base, "rates up", 0.08, LagBand::Immediate)];
        let rows = vec![row("ZZZ", &[("exp_other_factor", 0.5)])];
        let holdings = vec![free_holding("Cash", None, 1.0)];

        let recs = build_expression_recommendations(&branches, &shocks, &rows, &holdings, 24);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].score, 0.0);
        assert_eq!(recs[0].sizing_band, SizingBand::Small);
        assert_eq!(recs[0].direction, RecommendationDirection::Pos);
    }

    #[test]
    fn matching_factor_scores_and_sizes() {
        let branches = vec![branch(BranchName::Base, 1.0)];
        let shocks = vec![shock(BranchName::Base, "rates up", 0.08, LagBand::Immediate)];
        // 1.0 * 0.08 * 1.0 * 1.0 * 1.0 = 0.08 -> LARGE.
        let rows = vec![row("AAA", &[("exp_rates_up", 1.0)])];
        let holdings = vec![free_holding("Cash", None, 1.0)];

        let recs = build_expression_recommendations(&branches, &shocks, &rows, &holdings, 24);
        assert!((recs[0].score - 0.08).abs() < 1e-12);
        assert_eq!(recs[0].sizing_band, SizingBand::Large);
        // min(0.05 base, 1.0 * 0.05 free cap, 0.05 row default).
        assert!((recs[0].max_position_pct - 0.05).abs() < 1e-12);
    }

    #[test]
    fn short_horizon_discounts_long_lag() {
        let branches = vec![branch(BranchName::Base, 1.0)];
        let shocks = vec![shock(BranchName::Base, "slow burn", 0.08, LagBand::M18Plus)];
        let rows = vec![row("AAA", &[("exp_slow_burn", 1.0)])];
        let holdings = vec![free_holding("Cash", None, 1.0)];

        let long_horizon = build_expression_recommendations(&branches, &shocks, &rows, &holdings, 24);
        let short_horizon = build_expression_recommendations(&branches, &shocks, &rows, &holdings, 12);
        assert!((long_horizon[0].score - 0.08 * 0.6).abs() < 1e-12);
        assert!((short_horizon[0].score - 0.08 * 0.4).abs() < 1e-12);
    }

    #[test]
    fn already_expressed_rows_are_not_actionable() {
        let branches = vec![branch(BranchName::Base, 1.0)];
        let shocks = vec![shock(BranchName::Base, "rates up", 0.08, LagBand::Immediate)];
        let rows = vec![row("AAA", &[("exp_rates_up", 1.0)])];
        // Holding key "aaa inc" matches the row's company name.
        let holdings = vec![free_holding("AAA Inc", None, 1.0)];

        let recs = build_expression_recommendations(&branches, &shocks, &rows, &holdings, 24);
        assert!(recs[0].already_expressed);
        assert!(!recs[0].actionable);
    }

    #[test]
    fn zero_free_weight_blocks_actionability_but_keeps_base_cap() {
        let branches = vec![branch(BranchName::Base, 1.0)];
        let shocks = vec![shock(BranchName::Base, "rates up", 0.08, LagBand::Immediate)];
        let rows = vec![row("AAA", &[("exp_rates_up", 1.0)])];
        let mut locked = free_holding("Pension", None, 1.0);
        locked.constraint = HoldingConstraint::Locked;

        let recs = build_expression_recommendations(&branches, &shocks, &rows, &[locked], 24);
        assert!(!recs[0].actionable);
        assert!((recs[0].max_position_pct - 0.05).abs() < 1e-12);
    }

    #[test]
    fn shortlist_is_top_four_longs_and_top_three_shorts() {
        let branches = vec![branch(BranchName::Base, 1.0)];
        let shocks = vec![
            shock(BranchName::Base, "up factor", 0.08, LagBand::Immediate),
            shock(BranchName::Base, "down factor", -0.08, LagBand::Immediate),
        ];
        let mut rows = Vec::new();
        for i in 0..6 {
            rows.push(row(&format!("L{i}"), &[("exp_up_factor", 0.2 + 0.1 * i as f64)]));
        }
        for i in 0..5 {
            rows.push(row(&format!("S{i}"), &[("exp_down_factor", 0.2 + 0.1 * i as f64)]));
        }
        let holdings = vec![free_holding("Cash", None, 1.0)];

        let recs = build_expression_recommendations(&branches, &shocks, &rows, &holdings, 24);
        assert_eq!(recs.len(), 7);
        let longs: Vec<_> = recs
            .iter()
            .filter(|r| r.direction == RecommendationDirection::Pos)
            .collect();
        let shorts: Vec<_> = recs
            .iter()
            .filter(|r| r.direction == RecommendationDirection::Neg)
            .collect();
        assert_eq!(longs.len(), 4);
        assert_eq!(shorts.len(), 3);
        assert_eq!(longs[0].symbol, "L5");
        assert!(longs.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(shorts[0].symbol, "S4");
        assert!(shorts.windows(2).all(|w| w[0].score <= w[1].score));
    }
}
