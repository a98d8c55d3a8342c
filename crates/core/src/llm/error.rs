use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Where in the reasoning call a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmStage {
    Http,
    Parse,
}

impl LlmStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmStage::Http => "http",
            LlmStage::Parse => "parse",
        }
    }
}

/// Carries enough of a failed reasoning call for the audit snapshot: the
/// provider and stage that failed plus whatever raw output the model
/// produced. Travels inside `anyhow::Error` and is downcast again at the
/// persistence boundary.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: LlmStage,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reasoning call failed at the {} stage ({:?}): {}",
            self.stage.as_str(),
            self.provider,
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}
