use crate::domain::decision::{IndicatorDefinition, IndicatorStatus};
use crate::storage::from_db_enum;
use anyhow::Context;
use uuid::Uuid;

pub async fn fetch_indicator_definition(
    pool: &sqlx::PgPool,
    id: Uuid,
) -> anyhow::Result<Option<IndicatorDefinition>> {
    let row = sqlx::query_as::<_, (String, String, f64, f64, f64, String)>(
        "SELECT indicator_name, supports_direction, green_threshold, yellow_threshold, red_threshold, expected_window \
         FROM indicator_definitions \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("select indicator_definitions failed")?;

    let Some((indicator_name, supports_direction, green, yellow, red, expected_window)) = row else {
        return Ok(None);
    };
    Ok(Some(IndicatorDefinition {
        indicator_name,
        supports_direction: from_db_enum(&supports_direction)?,
        green_threshold: green,
        yellow_threshold: yellow,
        red_threshold: red,
        expected_window,
    }))
}

/// Records one observation against a monitored indicator.
pub async fn update_indicator_observation(
    pool: &sqlx::PgPool,
    id: Uuid,
    status: IndicatorStatus,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let updated = sqlx::query(
        "UPDATE indicator_definitions SET latest_status = $2, latest_note = COALESCE($3, latest_note) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(note)
    .execute(pool)
    .await
    .context("update indicator_definitions failed")?;

    anyhow::ensure!(updated.rows_affected() == 1, "indicator definition not found");
    Ok(())
}
