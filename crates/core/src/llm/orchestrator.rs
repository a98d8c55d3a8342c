use crate::domain::analyze::AnalyzeRequest;
use crate::domain::contract::AnalysisModelOutput;
use crate::llm::{AnalysisRun, LlmClient};

/// The retry budget is two attempts total: one corrective nudge is assumed
/// sufficient for a reasoning-model output, so there is no backoff loop.
#[derive(Debug)]
enum Attempt {
    First,
    RetryWithHint(String),
}

impl Attempt {
    fn hint(&self) -> Option<&str> {
        match self {
            Attempt::First => None,
            Attempt::RetryWithHint(hint) => Some(hint.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ObservedCounts {
    first: usize,
    second: usize,
    third: usize,
    fourth: usize,
    mappings: usize,
    recommendations: usize,
}

impl ObservedCounts {
    fn of(output: &AnalysisModelOutput) -> Self {
        Self {
            first: output.effects_by_layer.first.len(),
            second: output.effects_by_layer.second.len(),
            third: output.effects_by_layer.third.len(),
            fourth: output.effects_by_layer.fourth.len(),
            mappings: output.holding_mappings.len(),
            recommendations: output.asset_recommendations.len(),
        }
    }
}

struct AttemptFailure {
    error: anyhow::Error,
    observed: Option<ObservedCounts>,
}

fn corrective_hint(failure: &AttemptFailure) -> String {
    let mut hint = format!(
        "Your previous response failed validation with this error: {:#}.",
        failure.error
    );
    if let Some(counts) = failure.observed {
        hint.push_str(&format!(
            " Observed after dedupe: first-order effects={}, second-order={}, third-order={}, fourth-order={}, holding mappings={}, asset recommendations={}.",
            counts.first, counts.second, counts.third, counts.fourth, counts.mappings, counts.recommendations
        ));
    }
    hint.push_str(
        " Return corrected JSON with at least 2 first-order and 2 second-order effects, \
         each with valid confidence and distinct entries, exactly one mapping per unique \
         holding name, and at least one asset recommendation when SECOND/THIRD/FOURTH \
         effects are present.",
    );
    hint
}

async fn run_attempt(
    llm: &dyn LlmClient,
    request: &AnalyzeRequest,
    hint: Option<&str>,
) -> Result<AnalysisRun, AttemptFailure> {
    let run = llm
        .run_structured_analysis(request, hint)
        .await
        .map_err(|error| AttemptFailure {
            error,
            observed: None,
        })?;

    let AnalysisRun {
        model_name,
        prompt_version,
        output,
        raw,
    } = run;

    let output = output
        .sanitize()
        .dedupe_effects()
        .dedupe_holding_mappings()
        .dedupe_asset_recommendations();

    if let Err(error) = output.enforce_output_checks(&request.holdings) {
        return Err(AttemptFailure {
            error,
            observed: Some(ObservedCounts::of(&output)),
        });
    }

    Ok(AnalysisRun {
        model_name,
        prompt_version,
        output,
        raw,
    })
}

/// Drives the reasoning call to a validated output: sanitize, dedupe,
/// enforce invariants, and on the first failure retry exactly once with a
/// hint restating the violated rule and the counts observed. A second
/// failure propagates to the caller.
pub async fn generate_validated_output(
    llm: &dyn LlmClient,
    request: &AnalyzeRequest,
) -> anyhow::Result<AnalysisRun> {
    let mut state = Attempt::First;
    loop {
        match run_attempt(llm, request, state.hint()).await {
            Ok(run) => return Ok(run),
            Err(failure) => match state {
                Attempt::First => {
                    tracing::warn!(
                        error = %failure.error,
                        "reasoning output failed validation; retrying once with corrective hint"
                    );
                    state = Attempt::RetryWithHint(corrective_hint(&failure));
                }
                Attempt::RetryWithHint(_) => return Err(failure.error),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::analyze::{
        HoldingConstraint, HoldingInput, HoldingPurpose, Sensitivity,
    };
    use crate::domain::contract::{
        AssetRecommendation, CausalEffect, Confidence, EffectsByLayer, HoldingMapping,
        ImpactDirection, SourceLayer,
    };
    use crate::llm::{Provider, PROMPT_VERSION};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub(crate) struct ScriptedClient {
        responses: Mutex<VecDeque<anyhow::Result<AnalysisRun>>>,
        pub hints: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(responses: Vec<anyhow::Result<AnalysisRun>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                hints: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.hints.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedClient {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn run_structured_analysis(
            &self,
            _request: &AnalyzeRequest,
            hint: Option<&str>,
        ) -> anyhow::Result<AnalysisRun> {
            self.hints.lock().unwrap().push(hint.map(str::to_string));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted client ran out of responses")
        }
    }

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

    fn request() -> AnalyzeRequest {
        AnalyzeRequest {
            statement: "AI agents reduce custom software costs by 60%.".to_string(),
            probability: 0.4,
            horizon_months: 24,
            holdings: vec![holding("Infra Fund"), holding("SaaS Fund")],
            branch_overrides: Vec::new(),
            portfolio_scenario_id: None,
            universe_version_id: None,
            allow_weight_override: false,
            model_name: None,
        }
    }

    fn effect(description: &str) -> CausalEffect {
        CausalEffect {
            description: description.to_string(),
            impact_direction: ImpactDirection::Pos,
            confidence: Confidence::Med,
        }
    }

    fn mapping(name: &str) -> HoldingMapping {
        HoldingMapping {
            holding_name: name.to_string(),
            exposure_type: "Compute".to_string(),
            net_impact: ImpactDirection::Pos,
            mechanism: "Demand shift".to_string(),
            confidence: Confidence::Med,
        }
    }

    pub(crate) fn valid_output() -> AnalysisModelOutput {
        AnalysisModelOutput {
            effects_by_layer: EffectsByLayer {
                first: vec![effect("Compute demand rises"), effect("Software deflation")],
                second: vec![effect("Capex reallocation"), effect("Margin compression")],
                third: Vec::new(),
                fourth: Vec::new(),
            },
            assumptions: Vec::new(),
            leading_indicators: Vec::new(),
            holding_mappings: vec![mapping("Infra Fund"), mapping("SaaS Fund")],
            asset_recommendations: vec![AssetRecommendation {
                asset_name: "AI Software ETF".to_string(),
                asset_category: "ETF".to_string(),
                source_layer: SourceLayer::Second,
                direction: ImpactDirection::Pos,
                action: "OVERWEIGHT".to_string(),
                rationale: "Captures capex reallocation.".to_string(),
                confidence: Confidence::High,
                mechanism: "Demand reroutes toward software infra.".to_string(),
                time_horizon: None,
            }],
        }
    }

    pub(crate) fn run_of(output: AnalysisModelOutput) -> AnalysisRun {
        AnalysisRun {
            model_name: "stub-model".to_string(),
            prompt_version: PROMPT_VERSION,
            output,
            raw: serde_json::json!({"stub": true}),
        }
    }

    fn invalid_output() -> AnalysisModelOutput {
        let mut output = valid_output();
        output.effects_by_layer.first.truncate(1);
        output
    }

    #[tokio::test]
    async fn passes_through_on_first_valid_attempt() {
        let client = ScriptedClient::new(vec![Ok(run_of(valid_output()))]);
        let run = generate_validated_output(&client, &request()).await.unwrap();
        assert_eq!(client.calls(), 1);
        assert_eq!(run.output.holding_mappings.len(), 2);
        assert!(client.hints.lock().unwrap()[0].is_none());
    }

    #[tokio::test]
    async fn retries_once_with_counts_in_the_hint() {
        let client = ScriptedClient::new(vec![
            Ok(run_of(invalid_output())),
            Ok(run_of(valid_output())),
        ]);
        let run = generate_validated_output(&client, &request()).await.unwrap();
        assert_eq!(client.calls(), 2);
        assert_eq!(run.output.effects_by_layer.first.len(), 2);

        let hints = client.hints.lock().unwrap();
        let hint = hints[1].as_deref().unwrap();
        assert!(hint.contains("first-order"));
        assert!(hint.contains("first-order effects=1"));
        assert!(hint.contains("exactly one mapping"));
    }

    #[tokio::test]
    async fn retries_after_transport_errors_without_counts() {
        let client = ScriptedClient::new(vec![
            Err(anyhow::anyhow!("schema fail")),
            Ok(run_of(valid_output())),
        ]);
        let run = generate_validated_output(&client, &request()).await.unwrap();
        assert_eq!(client.calls(), 2);
        assert_eq!(run.output.effects_by_layer.first.len(), 2);

        let hints = client.hints.lock().unwrap();
        let hint = hints[1].as_deref().unwrap();
        assert!(hint.contains("schema fail"));
        assert!(!hint.contains("Observed after dedupe"));
    }

    #[tokio::test]
    async fn second_failure_propagates() {
        let client = ScriptedClient::new(vec![
            Ok(run_of(invalid_output())),
            Ok(run_of(invalid_output())),
        ]);
        let err = generate_validated_output(&client, &request()).await.unwrap_err();
        assert_eq!(client.calls(), 2);
        assert!(err.to_string().contains("first-order"));
    }

    #[tokio::test]
    async fn dedupe_runs_before_invariant_checks() {
        // Duplicate mappings for one holding collapse to a single entry, so
        // the one-mapping-per-holding rule passes.
        let mut output = valid_output();
        output.holding_mappings.push(mapping("Infra Fund!"));
        let client = ScriptedClient::new(vec![Ok(run_of(output))]);
        let run = generate_validated_output(&client, &request()).await.unwrap();
        assert_eq!(client.calls(), 1);
        assert_eq!(run.output.holding_mappings.len(), 2);
    }

    #[tokio::test]
    async fn missing_mapping_fails_naming_the_holding() {
        let mut output = valid_output();
        output.holding_mappings.retain(|m| m.holding_name != "SaaS Fund");
        let client = ScriptedClient::new(vec![
            Ok(run_of(output.clone())),
            Ok(run_of(output)),
        ]);
        let err = generate_validated_output(&client, &request()).await.unwrap_err();
        assert!(err.to_string().contains("SaaS Fund"));
        let hints = client.hints.lock().unwrap();
        assert!(hints[1].as_deref().unwrap().contains("SaaS Fund"));
    }
}
