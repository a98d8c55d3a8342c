use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secondorder_core::domain::analyze::AnalyzeRequest;
use secondorder_core::ingest::{holdings::parse_holdings_csv, universe::parse_universe_csv};
use secondorder_core::llm::anthropic::{default_model, AnthropicClient};
use secondorder_core::llm::error::LlmDiagnosticsError;
use secondorder_core::pipeline::run_analysis;

#[derive(Debug, Parser)]
#[command(name = "secondorder_worker")]
struct Args {
    /// Structural-shift thesis to stress test (10-500 chars).
    #[arg(long)]
    statement: String,

    /// Probability assigned to the thesis (0-1).
    #[arg(long)]
    probability: f64,

    /// Analysis horizon in months (1-120).
    #[arg(long, default_value_t = 12)]
    horizon_months: i32,

    /// Path to a holdings scenario CSV.
    #[arg(long)]
    holdings_csv: std::path::PathBuf,

    /// Optional path to a universe CSV for expression recommendations.
    #[arg(long)]
    universe_csv: Option<std::path::PathBuf>,

    /// Accept weight sums outside 98-102%.
    #[arg(long)]
    allow_weight_override: bool,

    /// Do everything except writing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = secondorder_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let holdings_text = std::fs::read_to_string(&args.holdings_csv)
        .with_context(|| format!("failed to read {}", args.holdings_csv.display()))?;
    let holdings = parse_holdings_csv(&holdings_text)?;

    let universe = match &args.universe_csv {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = parse_universe_csv(&text)?;
            for warning in &parsed.warnings {
                tracing::warn!(%warning, "universe ingestion warning");
            }
            parsed.rows
        }
        None => Vec::new(),
    };

    let mut request = AnalyzeRequest {
        statement: args.statement,
        probability: args.probability,
        horizon_months: args.horizon_months,
        holdings,
        branch_overrides: Vec::new(),
        portfolio_scenario_id: None,
        universe_version_id: None,
        allow_weight_override: args.allow_weight_override,
        model_name: None,
    };
    request.normalize_and_validate()?;

    let llm = AnthropicClient::from_settings(&settings)?;

    if args.dry_run {
        let outcome = run_analysis(&llm, &request, &universe).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        tracing::info!(
            dry_run = true,
            bias = outcome.bias.portfolio_bias,
            node_shocks = outcome.node_shocks.len(),
            recommendations = outcome.recommendations.len(),
            "analysis complete (not persisted)"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;
    secondorder_core::storage::migrate(&pool).await?;

    match run_analysis(&llm, &request, &universe).await {
        Ok(outcome) => {
            let theme_id =
                secondorder_core::storage::runs::persist_success(&pool, None, &request, &outcome)
                    .await?;
            tracing::info!(
                %theme_id,
                bias = outcome.bias.portfolio_bias,
                label = outcome.bias.bias_label.as_str(),
                "persisted analysis run"
            );
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);

            let mut raw_llm_response: Option<serde_json::Value> = None;
            if let Some(diag) = err.downcast_ref::<LlmDiagnosticsError>() {
                if let Some(raw) = diag.raw_output.as_deref() {
                    raw_llm_response = serde_json::from_str(raw)
                        .ok()
                        .or_else(|| Some(serde_json::json!({ "raw_text": raw })));
                }
            }

            let model_name = request.model_name.clone().unwrap_or_else(default_model);
            let theme_id = secondorder_core::storage::runs::persist_failure(
                &pool,
                None,
                &request,
                &model_name,
                &format!("{err:#}"),
                raw_llm_response,
            )
            .await?;

            tracing::error!(%theme_id, error = %err, "analysis run failed");
        }
    }

    Ok(())
}

fn init_sentry(settings: &secondorder_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
