use crate::domain::analyze::AnalyzeRequest;
use crate::pipeline::AnalysisOutcome;
use crate::storage::to_db_enum;
use crate::text::normalize_text_key;
use anyhow::Context;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Persists one completed analysis run: theme, effects, holdings, mappings,
/// invalidation items, indicator definitions, branches, node shocks,
/// recommendations and the raw snapshot, all in a single transaction so a
/// partial run is never observable as a success.
pub async fn persist_success(
    pool: &sqlx::PgPool,
    user_id: Option<Uuid>,
    request: &AnalyzeRequest,
    outcome: &AnalysisOutcome,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let theme_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO themes (id, user_id, statement, probability, horizon_months, portfolio_scenario_id) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(theme_id)
    .bind(user_id)
    .bind(&request.statement)
    .bind(request.probability)
    .bind(request.horizon_months)
    .bind(request.portfolio_scenario_id)
    .execute(&mut *tx)
    .await
    .context("insert themes failed")?;

    for (layer, effects) in outcome.output.effects_by_layer.layers() {
        for (order_index, effect) in effects.iter().enumerate() {
            sqlx::query(
                "INSERT INTO theme_effects (id, theme_id, layer, description, impact_direction, confidence, order_index) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(theme_id)
            .bind(layer.as_str().to_uppercase())
            .bind(&effect.description)
            .bind(to_db_enum(&effect.impact_direction)?)
            .bind(to_db_enum(&effect.confidence)?)
            .bind(order_index as i32)
            .execute(&mut *tx)
            .await
            .context("insert theme_effects failed")?;
        }
    }

    let mut holding_ids = Vec::with_capacity(request.holdings.len());
    for holding in &request.holdings {
        let holding_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO holdings (id, theme_id, name, ticker, weight, sensitivity, constraint_level, purpose, exposure_tags) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(holding_id)
        .bind(theme_id)
        .bind(&holding.name)
        .bind(&holding.ticker)
        .bind(holding.weight)
        .bind(to_db_enum(&holding.sensitivity)?)
        .bind(to_db_enum(&holding.constraint)?)
        .bind(to_db_enum(&holding.purpose)?)
        .bind(serde_json::to_value(&holding.exposure_tags)?)
        .execute(&mut *tx)
        .await
        .context("insert holdings failed")?;
        holding_ids.push((holding_id, holding.name.clone()));
    }

    let mapping_by_key: BTreeMap<String, _> = outcome
        .output
        .holding_mappings
        .iter()
        .map(|m| (normalize_text_key(&m.holding_name), m))
        .collect();
    for (holding_id, holding_name) in &holding_ids {
        let Some(mapping) = mapping_by_key.get(&normalize_text_key(holding_name)) else {
            anyhow::bail!("no holding match for mapping: {holding_name}");
        };
        sqlx::query(
            "INSERT INTO portfolio_mappings (id, theme_id, holding_id, exposure_type, net_impact, mechanism, confidence) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(theme_id)
        .bind(holding_id)
        .bind(&mapping.exposure_type)
        .bind(to_db_enum(&mapping.net_impact)?)
        .bind(&mapping.mechanism)
        .bind(to_db_enum(&mapping.confidence)?)
        .execute(&mut *tx)
        .await
        .context("insert portfolio_mappings failed")?;
    }

    // Assumptions and leading indicators pair up positionally; the shorter
    // list repeats its last entry.
    let assumptions = &outcome.output.assumptions;
    let indicators = &outcome.output.leading_indicators;
    let max_len = assumptions.len().max(indicators.len());
    for idx in 0..max_len {
        let assumption = assumptions.get(idx).or(assumptions.last());
        let indicator = indicators.get(idx).or(indicators.last());
        let (Some(assumption), Some(indicator)) = (assumption, indicator) else {
            continue;
        };
        sqlx::query(
            "INSERT INTO invalidation_items (id, theme_id, assumption, breakpoint_signal, indicator_name, latest_note) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(theme_id)
        .bind(&assumption.assumption)
        .bind(&assumption.breakpoint_signal)
        .bind(&indicator.name)
        .bind(&indicator.rationale)
        .execute(&mut *tx)
        .await
        .context("insert invalidation_items failed")?;
    }

    for definition in &outcome.indicator_definitions {
        sqlx::query(
            "INSERT INTO indicator_definitions (id, theme_id, indicator_name, supports_direction, green_threshold, yellow_threshold, red_threshold, expected_window) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(theme_id)
        .bind(&definition.indicator_name)
        .bind(to_db_enum(&definition.supports_direction)?)
        .bind(definition.green_threshold)
        .bind(definition.yellow_threshold)
        .bind(definition.red_threshold)
        .bind(&definition.expected_window)
        .execute(&mut *tx)
        .await
        .context("insert indicator_definitions failed")?;
    }

    let mut branch_id_by_name = BTreeMap::new();
    for branch in &outcome.branches {
        let branch_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO theme_branches (id, theme_id, name, probability, rationale) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(branch_id)
        .bind(theme_id)
        .bind(branch.name.to_string())
        .bind(branch.probability)
        .bind(&branch.rationale)
        .execute(&mut *tx)
        .await
        .context("insert theme_branches failed")?;
        branch_id_by_name.insert(branch.name, branch_id);
    }

    for shock in &outcome.node_shocks {
        let Some(branch_id) = branch_id_by_name.get(&shock.branch_name) else {
            anyhow::bail!("node shock references unknown branch {}", shock.branch_name);
        };
        sqlx::query(
            "INSERT INTO theme_node_shocks (id, branch_id, node_key, node_label, direction, magnitude_pct, strength, lag, confidence, evidence_note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(branch_id)
        .bind(&shock.node_key)
        .bind(&shock.node_label)
        .bind(to_db_enum(&shock.direction)?)
        .bind(shock.magnitude_pct)
        .bind(to_db_enum(&shock.strength)?)
        .bind(shock.lag.as_str())
        .bind(to_db_enum(&shock.confidence)?)
        .bind(&shock.evidence_note)
        .execute(&mut *tx)
        .await
        .context("insert theme_node_shocks failed")?;
    }

    for rec in &outcome.recommendations {
        sqlx::query(
            "INSERT INTO expression_recommendations (id, theme_id, symbol, name, asset_type, direction, action, sizing_band, max_position_pct, score, mechanism, catalyst_window, priced_in_note, risk_note, invalidation_trigger, portfolio_role, actionable, already_expressed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(Uuid::new_v4())
        .bind(theme_id)
        .bind(&rec.symbol)
        .bind(&rec.name)
        .bind(rec.asset_type.as_str())
        .bind(to_db_enum(&rec.direction)?)
        .bind(&rec.action)
        .bind(rec.sizing_band.as_str())
        .bind(rec.max_position_pct)
        .bind(rec.score)
        .bind(&rec.mechanism)
        .bind(&rec.catalyst_window)
        .bind(&rec.priced_in_note)
        .bind(&rec.risk_note)
        .bind(&rec.invalidation_trigger)
        .bind(&rec.portfolio_role)
        .bind(rec.actionable)
        .bind(rec.already_expressed)
        .execute(&mut *tx)
        .await
        .context("insert expression_recommendations failed")?;
    }

    let raw_output_json = json!({
        "output": outcome.output,
        "raw": outcome.raw,
        "decisionSummary": outcome.decision_summary,
        "branches": outcome.branches,
        "nodeShocks": outcome.node_shocks,
        "recommendations": outcome.recommendations,
        "exposureContributions": outcome.exposure_contributions,
        "portfolioValidation": outcome.portfolio_validation,
    });
    sqlx::query(
        "INSERT INTO run_snapshots (id, theme_id, model_name, prompt_version, raw_output_json, computed_bias_score, bias_label) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(theme_id)
    .bind(&outcome.model_name)
    .bind(outcome.prompt_version)
    .bind(raw_output_json)
    .bind(outcome.bias.portfolio_bias)
    .bind(outcome.bias.bias_label.as_str())
    .execute(&mut *tx)
    .await
    .context("insert run_snapshots failed")?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(theme_id)
}

/// Audit record for a failed run: the theme plus a snapshot with neutral
/// bias, zero score and the failure message. Partial failure stays visible
/// instead of vanishing.
pub async fn persist_failure(
    pool: &sqlx::PgPool,
    user_id: Option<Uuid>,
    request: &AnalyzeRequest,
    model_name: &str,
    error: &str,
    raw_llm_response: Option<serde_json::Value>,
) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let theme_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO themes (id, user_id, statement, probability, horizon_months) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(theme_id)
    .bind(user_id)
    .bind(&request.statement)
    .bind(request.probability)
    .bind(request.horizon_months)
    .execute(&mut *tx)
    .await
    .context("insert error theme failed")?;

    let raw_output_json = json!({
        "error": error,
        "raw": raw_llm_response,
    });
    sqlx::query(
        "INSERT INTO run_snapshots (id, theme_id, model_name, prompt_version, raw_output_json, computed_bias_score, bias_label) \
         VALUES ($1, $2, $3, $4, $5, 0, 'NEUTRAL')",
    )
    .bind(Uuid::new_v4())
    .bind(theme_id)
    .bind(model_name)
    .bind(crate::llm::PROMPT_VERSION)
    .bind(raw_output_json)
    .execute(&mut *tx)
    .await
    .context("insert error run_snapshots failed")?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(theme_id)
}
