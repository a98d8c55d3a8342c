use crate::domain::analyze::HoldingInput;
use crate::storage::{from_db_enum, to_db_enum};
use anyhow::Context;
use uuid::Uuid;

pub async fn create_scenario(
    pool: &sqlx::PgPool,
    user_id: Option<Uuid>,
    name: &str,
    holdings: &[HoldingInput],
) -> anyhow::Result<Uuid> {
    anyhow::ensure!(!holdings.is_empty(), "scenario must have at least one holding");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let scenario_id = Uuid::new_v4();
    sqlx::query("INSERT INTO portfolio_scenarios (id, user_id, name) VALUES ($1, $2, $3)")
        .bind(scenario_id)
        .bind(user_id)
        .bind(name)
        .execute(&mut *tx)
        .await
        .context("insert portfolio_scenarios failed")?;

    for (order_index, holding) in holdings.iter().enumerate() {
        sqlx::query(
            "INSERT INTO scenario_holdings (id, scenario_id, name, ticker, weight, sensitivity, constraint_level, purpose, exposure_tags, order_index) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(scenario_id)
        .bind(&holding.name)
        .bind(&holding.ticker)
        .bind(holding.weight)
        .bind(to_db_enum(&holding.sensitivity)?)
        .bind(to_db_enum(&holding.constraint)?)
        .bind(to_db_enum(&holding.purpose)?)
        .bind(serde_json::to_value(&holding.exposure_tags)?)
        .bind(order_index as i32)
        .execute(&mut *tx)
        .await
        .context("insert scenario_holdings failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(scenario_id)
}

/// Loads a scenario's holdings in their saved order, enforcing ownership.
pub async fn fetch_scenario_holdings(
    pool: &sqlx::PgPool,
    scenario_id: Uuid,
    user_id: Option<Uuid>,
) -> anyhow::Result<Vec<HoldingInput>> {
    let owner: Option<(Option<Uuid>,)> =
        sqlx::query_as("SELECT user_id FROM portfolio_scenarios WHERE id = $1")
            .bind(scenario_id)
            .fetch_optional(pool)
            .await
            .context("select portfolio_scenarios failed")?;
    let Some((owner,)) = owner else {
        anyhow::bail!("portfolio scenario not found");
    };
    if owner != user_id {
        anyhow::bail!("portfolio scenario not found");
    }

    let rows = sqlx::query_as::<
        _,
        (
            String,
            Option<String>,
            Option<f64>,
            String,
            String,
            String,
            serde_json::Value,
        ),
    >(
        "SELECT name, ticker, weight, sensitivity, constraint_level, purpose, exposure_tags \
         FROM scenario_holdings \
         WHERE scenario_id = $1 \
         ORDER BY order_index ASC",
    )
    .bind(scenario_id)
    .fetch_all(pool)
    .await
    .context("select scenario_holdings failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (name, ticker, weight, sensitivity, constraint, purpose, tags) in rows {
        out.push(HoldingInput {
            name,
            ticker,
            weight,
            sensitivity: from_db_enum(&sensitivity)?,
            constraint: from_db_enum(&constraint)?,
            purpose: from_db_enum(&purpose)?,
            exposure_tags: serde_json::from_value(tags).unwrap_or_default(),
        });
    }
    Ok(out)
}
