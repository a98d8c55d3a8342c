use crate::text::normalize_text_key;
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sensitivity {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldingConstraint {
    Locked,
    SemiLocked,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldingPurpose {
    #[serde(rename = "TAX")]
    Tax,
    #[serde(rename = "SPEND_0_12M")]
    Spend0To12m,
    #[serde(rename = "SPEND_12_36M")]
    Spend12To36m,
    #[serde(rename = "LIFESTYLE_DRAWDOWN")]
    LifestyleDrawdown,
    #[serde(rename = "LONG_TERM_GROWTH")]
    LongTermGrowth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchName {
    Base,
    Bull,
    Bear,
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BranchName::Base => "BASE",
            BranchName::Bull => "BULL",
            BranchName::Bear => "BEAR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub sensitivity: Sensitivity,
    #[serde(default = "HoldingInput::default_constraint")]
    pub constraint: HoldingConstraint,
    #[serde(default = "HoldingInput::default_purpose")]
    pub purpose: HoldingPurpose,
    #[serde(default)]
    pub exposure_tags: Vec<String>,
}

impl HoldingInput {
    fn default_constraint() -> HoldingConstraint {
        HoldingConstraint::Free
    }

    fn default_purpose() -> HoldingPurpose {
        HoldingPurpose::LongTermGrowth
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchOverride {
    pub name: BranchName,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub statement: String,
    pub probability: f64,
    pub horizon_months: i32,
    pub holdings: Vec<HoldingInput>,
    #[serde(default)]
    pub branch_overrides: Vec<BranchOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_scenario_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_version_id: Option<Uuid>,
    #[serde(default)]
    pub allow_weight_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl AnalyzeRequest {
    /// Reinterprets percent-looking weights and enforces every range the
    /// request contract declares. Violations here are input validation
    /// errors: surfaced immediately, never retried, never persisted.
    pub fn normalize_and_validate(&mut self) -> anyhow::Result<()> {
        let statement_len = self.statement.trim().chars().count();
        ensure!(
            (10..=500).contains(&statement_len),
            "statement must be 10..=500 chars (got {statement_len})"
        );
        ensure!(
            (0.0..=1.0).contains(&self.probability),
            "probability must be between 0 and 1 (got {})",
            self.probability
        );
        ensure!(
            (1..=120).contains(&self.horizon_months),
            "horizonMonths must be 1..=120 (got {})",
            self.horizon_months
        );
        ensure!(
            (1..=100).contains(&self.holdings.len()),
            "holdings must have 1..=100 entries (got {})",
            self.holdings.len()
        );

        let mut seen = BTreeSet::new();
        for holding in &mut self.holdings {
            holding.name = holding.name.trim().to_string();
            let name_len = holding.name.chars().count();
            ensure!(
                (1..=120).contains(&name_len),
                "holding name must be 1..=120 chars"
            );
            ensure!(
                seen.insert(normalize_text_key(&holding.name)),
                "duplicate holding name: {}",
                holding.name
            );

            if let Some(ticker) = &holding.ticker {
                ensure!(
                    ticker.chars().count() <= 20,
                    "ticker too long for holding {}",
                    holding.name
                );
            }

            if let Some(weight) = holding.weight {
                // Percent-entered weights (e.g. 60 instead of 0.6) are
                // reinterpreted, matching the request contract.
                let weight = if weight > 1.0 && weight <= 100.0 {
                    weight / 100.0
                } else {
                    weight
                };
                ensure!(
                    (0.0..=1.0).contains(&weight),
                    "weight for holding {} must be 0..=1 after percent reinterpretation (got {weight})",
                    holding.name
                );
                holding.weight = Some(weight);
            }

            ensure!(
                holding.exposure_tags.len() <= 12,
                "holding {} has more than 12 exposure tags",
                holding.name
            );
            for tag in &holding.exposure_tags {
                let tag_len = tag.trim().chars().count();
                ensure!(
                    (1..=50).contains(&tag_len),
                    "exposure tag must be 1..=50 chars for holding {}",
                    holding.name
                );
            }
        }

        for or in &self.branch_overrides {
            ensure!(
                (0.0..=1.0).contains(&or.probability),
                "branch override probability for {} must be 0..=1",
                or.name
            );
        }

        Ok(())
    }
}
