use crate::domain::contract::AnalysisModelOutput;
use anyhow::Context;

/// Pulls a JSON object out of a model reply that may be fenced or wrapped
/// in prose. A Markdown fence wins; otherwise the outermost brace pair is
/// taken.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // The first line carries the fence and optional language tag.
        if let Some((_, rest)) = trimmed.split_once('\n') {
            let body = rest.rfind("```").map_or(rest, |end| &rest[..end]);
            return Some(body.trim().to_string());
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| trimmed[start..=end].trim().to_string())
}

pub fn parse_model_output(text: &str) -> anyhow::Result<AnalysisModelOutput> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str::<AnalysisModelOutput>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for the analysis schema: {json_str}"))
}
