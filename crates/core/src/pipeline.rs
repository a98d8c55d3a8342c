use crate::decision::branches::normalize_branch_probabilities;
use crate::decision::expression::build_expression_recommendations;
use crate::decision::indicators::derive_indicator_definitions;
use crate::decision::shocks::build_node_shocks;
use crate::decision::summary::{branch_impacts, build_decision_summary, BranchImpact};
use crate::decision::validate::validate_portfolio_reality;
use crate::domain::analyze::AnalyzeRequest;
use crate::domain::contract::AnalysisModelOutput;
use crate::domain::decision::{
    Branch, ContributionDirection, DecisionSummary, ExposureContribution,
    ExpressionRecommendation, IndicatorDefinition, NodeShock, PortfolioValidation, UniverseRow,
};
use crate::llm::{orchestrator, LlmClient};
use crate::scoring::{compute_portfolio_bias, PortfolioBias};
use anyhow::bail;
use serde::Serialize;

/// Everything one analysis run produces. A pure function of the request,
/// the universe and the reasoning response; persistence happens outside.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub bias: PortfolioBias,
    pub model_name: String,
    pub prompt_version: &'static str,
    #[serde(skip)]
    pub raw: serde_json::Value,
    pub output: AnalysisModelOutput,
    pub portfolio_validation: PortfolioValidation,
    pub branches: Vec<Branch>,
    pub node_shocks: Vec<NodeShock>,
    pub indicator_definitions: Vec<IndicatorDefinition>,
    pub recommendations: Vec<ExpressionRecommendation>,
    pub branch_impacts: Vec<BranchImpact>,
    pub exposure_contributions: Vec<ExposureContribution>,
    pub decision_summary: DecisionSummary,
}

/// Sequences the full request-to-result pipeline. Portfolio-reality errors
/// abort before the reasoning call is made; everything after the validated
/// output is deterministic derivation.
pub async fn run_analysis(
    llm: &dyn LlmClient,
    request: &AnalyzeRequest,
    universe: &[UniverseRow],
) -> anyhow::Result<AnalysisOutcome> {
    let portfolio_validation =
        validate_portfolio_reality(&request.holdings, request.allow_weight_override);
    if !portfolio_validation.errors.is_empty() {
        bail!("{}", portfolio_validation.errors.join(" | "));
    }

    let run = orchestrator::generate_validated_output(llm, request).await?;

    let bias = compute_portfolio_bias(request, &run.output)?;
    let branches = normalize_branch_probabilities(&request.branch_overrides);
    let node_shocks = build_node_shocks(&run.output, &branches);
    let indicator_definitions = derive_indicator_definitions(&run.output);

    let recommendations = if universe.is_empty() {
        Vec::new()
    } else {
        build_expression_recommendations(
            &branches,
            &node_shocks,
            universe,
            &request.holdings,
            request.horizon_months,
        )
    };

    let impacts = branch_impacts(bias.portfolio_bias, &branches);
    let decision_summary = build_decision_summary(&impacts, &recommendations, &indicator_definitions);

    let mut exposure_contributions: Vec<ExposureContribution> = bias
        .contributions
        .iter()
        .map(|c| ExposureContribution {
            holding_name: c.holding_name.clone(),
            score: c.score,
            weight: c.weight,
            direction: if c.score >= 0.0 {
                ContributionDirection::Upside
            } else {
                ContributionDirection::Downside
            },
        })
        .collect();
    exposure_contributions
        .sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

    Ok(AnalysisOutcome {
        bias,
        model_name: run.model_name,
        prompt_version: run.prompt_version,
        raw: run.raw,
        output: run.output,
        portfolio_validation,
        branches,
        node_shocks,
        indicator_definitions,
        recommendations,
        branch_impacts: impacts,
        exposure_contributions,
        decision_summary,
    })
}
