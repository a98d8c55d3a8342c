use anyhow::Context;

pub mod indicators;
pub mod runs;
pub mod scenarios;
pub mod universe;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Enums are stored as their wire names (serde renames), so TEXT columns
/// stay readable and round-trip through the same serde definitions.
pub(crate) fn to_db_enum<T: serde::Serialize>(value: &T) -> anyhow::Result<String> {
    match serde_json::to_value(value).context("enum serialization failed")? {
        serde_json::Value::String(s) => Ok(s),
        other => anyhow::bail!("expected string-serializable enum, got {other}"),
    }
}

pub(crate) fn from_db_enum<T: serde::de::DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("unexpected enum value in database: {raw}"))
}
