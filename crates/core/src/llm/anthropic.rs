use crate::config::Settings;
use crate::domain::analyze::AnalyzeRequest;
use crate::domain::contract::{
    MAX_ASSET_MECHANISM, MAX_ASSET_RATIONALE, MAX_EXPOSURE_TYPE, MAX_MECHANISM,
};
use crate::llm::error::{LlmDiagnosticsError, LlmStage};
use crate::llm::{json, AnalysisRun, LlmClient, Provider, PROMPT_VERSION};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

const TOOL_NAME_EMIT_ANALYSIS: &str = "emit_analysis";

/// Model name used when a request does not override it.
pub fn default_model() -> String {
    std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string())
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: LlmStage::Http,
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn effects_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "additionalProperties": false,
                "required": ["description", "impactDirection", "confidence"],
                "properties": {
                    "description": {"type": "string"},
                    "impactDirection": {"type": "string", "enum": ["POS", "NEG", "MIXED", "UNCERTAIN"]},
                    "confidence": {"type": "string", "enum": ["LOW", "MED", "HIGH"]}
                }
            }
        })
    }

    fn tools() -> Vec<Tool> {
        // Strict schema for the exact analysis contract. Keep it explicit to
        // maximize compliance.
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["effectsByLayer", "assumptions", "leadingIndicators", "holdingMappings", "assetRecommendations"],
            "properties": {
                "effectsByLayer": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["first", "second", "third", "fourth"],
                    "properties": {
                        "first": Self::effects_schema(),
                        "second": Self::effects_schema(),
                        "third": Self::effects_schema(),
                        "fourth": Self::effects_schema()
                    }
                },
                "assumptions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["assumption", "breakpointSignal"],
                        "properties": {
                            "assumption": {"type": "string"},
                            "breakpointSignal": {"type": "string"}
                        }
                    }
                },
                "leadingIndicators": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["name", "rationale"],
                        "properties": {
                            "name": {"type": "string"},
                            "rationale": {"type": "string"}
                        }
                    }
                },
                "holdingMappings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["holdingName", "exposureType", "netImpact", "mechanism", "confidence"],
                        "properties": {
                            "holdingName": {"type": "string"},
                            "exposureType": {"type": "string"},
                            "netImpact": {"type": "string", "enum": ["POS", "NEG", "MIXED", "UNCERTAIN"]},
                            "mechanism": {"type": "string"},
                            "confidence": {"type": "string", "enum": ["LOW", "MED", "HIGH"]}
                        }
                    }
                },
                "assetRecommendations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["assetName", "assetCategory", "sourceLayer", "direction", "action", "rationale", "confidence", "mechanism"],
                        "properties": {
                            "assetName": {"type": "string"},
                            "assetCategory": {"type": "string"},
                            "sourceLayer": {"type": "string", "enum": ["SECOND", "THIRD", "FOURTH"]},
                            "direction": {"type": "string", "enum": ["POS", "NEG", "MIXED", "UNCERTAIN"]},
                            "action": {"type": "string"},
                            "rationale": {"type": "string"},
                            "confidence": {"type": "string", "enum": ["LOW", "MED", "HIGH"]},
                            "mechanism": {"type": "string"},
                            "timeHorizon": {"type": ["string", "null"]}
                        }
                    }
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_ANALYSIS,
            description: "Emit the structural-shift causal analysis as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_ANALYSIS,
        }
    }

    fn system_prompt() -> String {
        let field_lengths = format!(
            "- Keep exposureType concise (<= {MAX_EXPOSURE_TYPE} chars) and mechanism concise (<= {MAX_MECHANISM} chars)."
        );
        let rec_lengths = format!(
            "- Keep recommendation rationale <= {MAX_ASSET_RATIONALE} chars and recommendation mechanism <= {MAX_ASSET_MECHANISM} chars."
        );
        [
            "You are a macro systems thinker focused on portfolio stress testing.",
            "Given a structural change, generate a concrete causal map and portfolio impacts.",
            "Rules:",
            "- Be specific and mechanism-driven.",
            field_lengths.as_str(),
            rec_lengths.as_str(),
            "- Avoid repeating the same idea across layers.",
            "- Keep a coherent first->second->third->fourth order chain with at least 2 first-order and 2 second-order effects.",
            "- Provide exactly one mapping per unique holding name (even if the same name appears multiple times).",
            "- If SECOND/THIRD/FOURTH effects are present, include at least one asset recommendation tied to those layers.",
            "- Use confidence levels LOW/MED/HIGH.",
            "Return JSON that exactly matches the required schema. No markdown, no extra keys.",
        ]
        .join("\n")
    }

    fn user_prompt(request: &AnalyzeRequest, hint: Option<&str>) -> String {
        let holdings_text = request
            .holdings
            .iter()
            .map(|h| {
                format!(
                    "- {} ({}), sensitivity={}, tags={}",
                    h.name,
                    h.ticker.as_deref().unwrap_or("N/A"),
                    format!("{:?}", h.sensitivity).to_uppercase(),
                    if h.exposure_tags.is_empty() {
                        "none".to_string()
                    } else {
                        h.exposure_tags.join(", ")
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Structural shift: {}\nProbability: {}\nHorizon months: {}\nHoldings:\n{}",
            request.statement, request.probability, request.horizon_months, holdings_text
        );
        if let Some(hint) = hint {
            prompt.push_str("\n\nCorrection:\n");
            prompt.push_str(hint);
        }
        prompt
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            match block {
                ContentBlock::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                ContentBlock::ToolUse { .. } => {
                    // Tool output is preferred; callers read it first.
                    continue;
                }
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
                ContentBlock::Unknown => {}
            }
        }
        out
    }

    fn response_tool_output(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<crate::domain::contract::AnalysisModelOutput>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_ANALYSIS {
                    let parsed = serde_json::from_value(input.clone())
                        .context("failed to decode tool_use.input into AnalysisModelOutput")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn run_structured_analysis(
        &self,
        request: &AnalyzeRequest,
        hint: Option<&str>,
    ) -> anyhow::Result<AnalysisRun> {
        let model = request
            .model_name
            .clone()
            .unwrap_or_else(|| self.model.clone());

        let make_req = |max_tokens: u32| CreateMessageRequest {
            model: model.clone(),
            max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::user_prompt(request, hint),
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let (mut raw_json, mut res) = self.create_message(make_req(self.max_tokens)).await?;

        // If the model hit max_tokens, retry once with a higher ceiling. This
        // is transport-level; the contract retry lives in the orchestrator.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(8192);
            tracing::warn!(
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (rj, r) = self.create_message(make_req(bumped)).await?;
            raw_json = rj;
            res = r;
        }

        // Tool output path.
        if let Some(output) = Self::response_tool_output(&res)? {
            return Ok(AnalysisRun {
                model_name: model,
                prompt_version: PROMPT_VERSION,
                output,
                raw: raw_json,
            });
        }

        // Fallback to text (should be rare with forced tool_choice).
        let text = Self::response_text(&res);
        match json::parse_model_output(&text) {
            Ok(output) => Ok(AnalysisRun {
                model_name: model,
                prompt_version: PROMPT_VERSION,
                output,
                raw: raw_json,
            }),
            Err(err) => Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: LlmStage::Parse,
                detail: format!("{err:#}"),
                raw_output: Some(text),
                raw_response_json: Some(raw_json),
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: String,
    },

    #[serde(rename = "redacted_thinking")]
    RedactedThinking {
        #[serde(default)]
        data: String,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tool_use_analysis_input() {
        let tool_input = json!({
            "effectsByLayer": {
                "first": [
                    {"description": "Compute demand rises", "impactDirection": "POS", "confidence": "HIGH"},
                    {"description": "Custom software deflates", "impactDirection": "NEG", "confidence": "MED"}
                ],
                "second": [],
                "third": [],
                "fourth": []
            },
            "assumptions": [],
            "leadingIndicators": [],
            "holdingMappings": [],
            "assetRecommendations": []
        });

        let res = CreateMessageResponse {
            content: vec![ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: TOOL_NAME_EMIT_ANALYSIS.to_string(),
                input: tool_input,
            }],
            stop_reason: None,
        };

        let output = AnthropicClient::response_tool_output(&res).unwrap().unwrap();
        assert_eq!(output.effects_by_layer.first.len(), 2);
        assert!(output.holding_mappings.is_empty());
    }

    #[test]
    fn hint_lands_in_the_user_prompt() {
        let request = AnalyzeRequest {
            statement: "AI agents reduce custom software costs by 60%.".to_string(),
            probability: 0.4,
            horizon_months: 24,
            holdings: Vec::new(),
            branch_overrides: Vec::new(),
            portfolio_scenario_id: None,
            universe_version_id: None,
            allow_weight_override: false,
            model_name: None,
        };
        let prompt = AnthropicClient::user_prompt(&request, Some("previous output had 1 first-order effect"));
        assert!(prompt.contains("Correction:"));
        assert!(prompt.contains("1 first-order effect"));
        assert!(AnthropicClient::user_prompt(&request, None).contains("Structural shift:"));
    }

    #[test]
    fn ignores_non_tool_blocks_when_collecting_text() {
        let res = CreateMessageResponse {
            content: vec![
                ContentBlock::Thinking {
                    thinking: "...".to_string(),
                    signature: String::new(),
                },
                ContentBlock::Text {
                    text: "{\"a\":1}".to_string(),
                },
            ],
            stop_reason: None,
        };
        assert_eq!(AnthropicClient::response_text(&res), "{\"a\":1}");
    }
}
