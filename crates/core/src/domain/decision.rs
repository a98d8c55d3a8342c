use crate::domain::analyze::BranchName;
use crate::domain::contract::Confidence;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub name: BranchName,
    pub probability: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShockDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShockStrength {
    Weak,
    Med,
    Strong,
}

/// Lag bands from immediate through 18+ months, tracking the causal layer a
/// shock was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LagBand {
    #[serde(rename = "IMMEDIATE")]
    Immediate,
    #[serde(rename = "M3_6")]
    M3To6,
    #[serde(rename = "M6_18")]
    M6To18,
    #[serde(rename = "M18_PLUS")]
    M18Plus,
}

impl LagBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            LagBand::Immediate => "IMMEDIATE",
            LagBand::M3To6 => "M3_6",
            LagBand::M6To18 => "M6_18",
            LagBand::M18Plus => "M18_PLUS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeShock {
    pub branch_name: BranchName,
    pub node_key: String,
    pub node_label: String,
    pub direction: ShockDirection,
    pub magnitude_pct: f64,
    pub strength: ShockStrength,
    pub lag: LagBand,
    pub confidence: Confidence,
    pub evidence_note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    Equity,
    Etf,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Equity => "EQUITY",
            AssetType::Etf => "ETF",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseRow {
    pub symbol: String,
    pub company_name: String,
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub liquidity_class: String,
    pub max_position_default_pct: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sensitivity coefficients in [-1, 1], keyed by `exp_*` factor column.
    #[serde(default)]
    pub exposure_vector: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationDirection {
    Pos,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingBand {
    Small,
    Medium,
    Large,
}

impl SizingBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingBand::Small => "SMALL",
            SizingBand::Medium => "MEDIUM",
            SizingBand::Large => "LARGE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionRecommendation {
    pub symbol: String,
    pub name: String,
    pub asset_type: AssetType,
    pub direction: RecommendationDirection,
    pub action: String,
    pub sizing_band: SizingBand,
    pub max_position_pct: f64,
    pub score: f64,
    pub mechanism: String,
    pub catalyst_window: String,
    pub priced_in_note: String,
    pub risk_note: String,
    pub invalidation_trigger: String,
    pub portfolio_role: String,
    pub actionable: bool,
    pub already_expressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportsDirection {
    HigherSupports,
    LowerSupports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorStatus {
    Green,
    Yellow,
    Red,
    Unknown,
}

impl IndicatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorStatus::Green => "GREEN",
            IndicatorStatus::Yellow => "YELLOW",
            IndicatorStatus::Red => "RED",
            IndicatorStatus::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDefinition {
    pub indicator_name: String,
    pub supports_direction: SupportsDirection,
    pub green_threshold: f64,
    pub yellow_threshold: f64,
    pub red_threshold: f64,
    pub expected_window: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    pub portfolio_impact_p10: f64,
    pub portfolio_impact_p50: f64,
    pub portfolio_impact_p90: f64,
    pub top_actions: Vec<String>,
    pub top_monitors: Vec<String>,
    pub change_my_mind: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioValidation {
    pub weight_sum: f64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub actionable_weight: f64,
    pub suspicious_weight_rows: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContributionDirection {
    Upside,
    Downside,
}

/// One holding's signed share of the portfolio bias, tagged for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureContribution {
    pub holding_name: String,
    pub score: f64,
    pub weight: f64,
    pub direction: ContributionDirection,
}
