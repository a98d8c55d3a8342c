use crate::domain::decision::UniverseRow;
use crate::storage::from_db_enum;
use anyhow::Context;
use std::collections::BTreeMap;
use uuid::Uuid;

pub async fn create_universe_version(
    pool: &sqlx::PgPool,
    user_id: Option<Uuid>,
    name: &str,
    rows: &[UniverseRow],
) -> anyhow::Result<Uuid> {
    anyhow::ensure!(!rows.is_empty(), "universe version must have at least one row");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let version_id = Uuid::new_v4();
    sqlx::query("INSERT INTO universe_versions (id, user_id, name) VALUES ($1, $2, $3)")
        .bind(version_id)
        .bind(user_id)
        .bind(name)
        .execute(&mut *tx)
        .await
        .context("insert universe_versions failed")?;

    for row in rows {
        sqlx::query(
            "INSERT INTO universe_companies (id, version_id, symbol, company_name, asset_type, region, currency, liquidity_class, max_position_default_pct, tags, exposure_vector) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(Uuid::new_v4())
        .bind(version_id)
        .bind(&row.symbol)
        .bind(&row.company_name)
        .bind(row.asset_type.as_str())
        .bind(&row.region)
        .bind(&row.currency)
        .bind(&row.liquidity_class)
        .bind(row.max_position_default_pct)
        .bind(serde_json::to_value(&row.tags)?)
        .bind(serde_json::to_value(&row.exposure_vector)?)
        .execute(&mut *tx)
        .await
        .context("insert universe_companies failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(version_id)
}

/// Loads a universe version's rows, enforcing ownership.
pub async fn fetch_universe_rows(
    pool: &sqlx::PgPool,
    version_id: Uuid,
    user_id: Option<Uuid>,
) -> anyhow::Result<Vec<UniverseRow>> {
    let owner: Option<(Option<Uuid>,)> =
        sqlx::query_as("SELECT user_id FROM universe_versions WHERE id = $1")
            .bind(version_id)
            .fetch_optional(pool)
            .await
            .context("select universe_versions failed")?;
    let Some((owner,)) = owner else {
        anyhow::bail!("selected universe version not found");
    };
    if owner != user_id {
        anyhow::bail!("selected universe version not found");
    }

    let rows = sqlx::query_as::<
        _,
        (
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            f64,
            serde_json::Value,
            serde_json::Value,
        ),
    >(
        "SELECT symbol, company_name, asset_type, region, currency, liquidity_class, max_position_default_pct, tags, exposure_vector \
         FROM universe_companies \
         WHERE version_id = $1 \
         ORDER BY symbol ASC",
    )
    .bind(version_id)
    .fetch_all(pool)
    .await
    .context("select universe_companies failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (symbol, company_name, asset_type, region, currency, liquidity_class, max_pct, tags, vector) in rows {
        out.push(UniverseRow {
            symbol,
            company_name,
            asset_type: from_db_enum(&asset_type)?,
            region,
            currency,
            liquidity_class,
            max_position_default_pct: max_pct,
            tags: serde_json::from_value(tags).unwrap_or_default(),
            exposure_vector: json_to_exposure_map(vector),
        });
    }
    Ok(out)
}

fn json_to_exposure_map(value: serde_json::Value) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let serde_json::Value::Object(obj) = value else {
        return out;
    };
    for (key, val) in obj {
        if let Some(n) = val.as_f64() {
            out.insert(key, n);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exposure_map_keeps_numeric_entries_only() {
        let map = json_to_exposure_map(json!({"exp_rates_up": 0.5, "junk": "x"}));
        assert_eq!(map.get("exp_rates_up"), Some(&0.5));
        assert!(!map.contains_key("junk"));
        assert!(json_to_exposure_map(json!("not an object")).is_empty());
    }
}
