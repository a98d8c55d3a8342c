pub mod anthropic;
pub mod error;
pub mod json;
pub mod orchestrator;

use crate::domain::analyze::AnalyzeRequest;
use crate::domain::contract::AnalysisModelOutput;

pub const PROMPT_VERSION: &str = "v1";

#[derive(Debug, Clone)]
pub enum Provider {
    Anthropic,
}

/// One reasoning call's result: the parsed contract output plus the raw
/// response for audit snapshots.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub model_name: String,
    pub prompt_version: &'static str,
    pub output: AnalysisModelOutput,
    pub raw: serde_json::Value,
}

/// The external reasoning capability. Everything downstream of the network
/// call (sanitize, dedupe, invariants, retry) lives in the orchestrator so
/// it can run against a deterministic stand-in.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn run_structured_analysis(
        &self,
        request: &AnalyzeRequest,
        hint: Option<&str>,
    ) -> anyhow::Result<AnalysisRun>;
}
