use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use secondorder_core::decision::indicators::classify_observed_value;
use secondorder_core::decision::summary::BranchImpact;
use secondorder_core::domain::analyze::{AnalyzeRequest, HoldingInput};
use secondorder_core::domain::contract::AnalysisModelOutput;
use secondorder_core::domain::decision::{
    Branch, DecisionSummary, ExposureContribution, ExpressionRecommendation,
    IndicatorDefinition, IndicatorStatus, NodeShock, PortfolioValidation, UniverseRow,
};
use secondorder_core::ingest::{holdings::parse_holdings_csv, universe::parse_universe_csv};
use secondorder_core::llm::anthropic::AnthropicClient;
use secondorder_core::llm::error::LlmDiagnosticsError;
use secondorder_core::pipeline::run_analysis;
use secondorder_core::scoring::PortfolioBias;
use secondorder_core::storage;

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

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let llm: Option<Arc<AnthropicClient>> = match AnthropicClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::error!(error = %e, "Anthropic client unavailable; analyze endpoint degraded");
            None
        }
    };

    let state = AppState { pool, llm };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/themes/analyze", post(analyze_theme))
        .route("/scenarios", post(create_scenario))
        .route("/universe/upload", post(upload_universe))
        .route("/indicators/:id", patch(observe_indicator))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    llm: Option<Arc<AnthropicClient>>,
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": message })),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSuccess {
    ok: bool,
    theme_id: Uuid,
    bias: PortfolioBias,
    analysis: AnalysisModelOutput,
    portfolio_validation: PortfolioValidation,
    branches: Vec<Branch>,
    node_shocks: Vec<NodeShock>,
    recommendations: Vec<ExpressionRecommendation>,
    indicator_definitions: Vec<IndicatorDefinition>,
    branch_impacts: Vec<BranchImpact>,
    exposure_contributions: Vec<ExposureContribution>,
    decision_summary: DecisionSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeFailure {
    ok: bool,
    theme_id: Option<Uuid>,
    error: String,
}

async fn analyze_theme(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let (Some(pool), Some(llm)) = (&state.pool, &state.llm) else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    // Shape and range problems are the caller's to fix; nothing is persisted.
    let mut request: AnalyzeRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("invalid analyze request: {e}")),
    };
    if let Err(e) = request.normalize_and_validate() {
        return bad_request(format!("{e:#}"));
    }

    let user_id: Option<Uuid> = None;

    // Scenario and universe reads are independent; fetch them concurrently.
    let loaded = tokio::try_join!(
        async {
            match request.portfolio_scenario_id {
                Some(id) => storage::scenarios::fetch_scenario_holdings(pool, id, user_id)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        },
        async {
            match request.universe_version_id {
                Some(id) => storage::universe::fetch_universe_rows(pool, id, user_id)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        },
    );

    let outcome = match loaded {
        Ok((scenario_holdings, universe_rows)) => {
            if let Some(holdings) = scenario_holdings {
                request.holdings = holdings;
            }
            match request.normalize_and_validate() {
                Ok(()) => {
                    let universe: Vec<UniverseRow> = universe_rows.unwrap_or_default();
                    run_analysis(llm.as_ref(), &request, &universe).await
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(outcome) => {
            match storage::runs::persist_success(pool, user_id, &request, &outcome).await {
                Ok(theme_id) => Json(AnalyzeSuccess {
                    ok: true,
                    theme_id,
                    bias: outcome.bias,
                    analysis: outcome.output,
                    portfolio_validation: outcome.portfolio_validation,
                    branches: outcome.branches,
                    node_shocks: outcome.node_shocks,
                    recommendations: outcome.recommendations,
                    indicator_definitions: outcome.indicator_definitions,
                    branch_impacts: outcome.branch_impacts,
                    exposure_contributions: outcome.exposure_contributions,
                    decision_summary: outcome.decision_summary,
                })
                .into_response(),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "persisting analysis failed");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            let message = format!("{err:#}");

            let mut raw_llm_response: Option<serde_json::Value> = None;
            if let Some(diag) = err.downcast_ref::<LlmDiagnosticsError>() {
                if let Some(raw) = diag.raw_output.as_deref() {
                    raw_llm_response = serde_json::from_str(raw)
                        .ok()
                        .or_else(|| Some(json!({ "raw_text": raw })));
                }
            }

            let model_name = request
                .model_name
                .clone()
                .unwrap_or_else(secondorder_core::llm::anthropic::default_model);
            let theme_id = storage::runs::persist_failure(
                pool,
                user_id,
                &request,
                &model_name,
                &message,
                raw_llm_response,
            )
            .await
            .map_err(|e| {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "persisting failure audit record failed");
            })
            .ok();

            tracing::error!(?theme_id, error = %message, "analysis run failed");
            Json(AnalyzeFailure {
                ok: false,
                theme_id,
                error: message,
            })
            .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioCreateBody {
    name: String,
    #[serde(default)]
    csv_text: Option<String>,
    #[serde(default)]
    holdings: Option<Vec<HoldingInput>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioCreated {
    ok: bool,
    scenario_id: Uuid,
    holdings: Vec<HoldingInput>,
    warnings: Vec<String>,
}

async fn create_scenario(
    State(state): State<AppState>,
    Json(body): Json<ScenarioCreateBody>,
) -> Response {
    let Some(pool) = &state.pool else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let name = body.name.trim();
    let name_len = name.chars().count();
    if !(2..=120).contains(&name_len) {
        return bad_request("scenario name must be 2..=120 chars".to_string());
    }

    let holdings = match (body.holdings, body.csv_text) {
        (Some(holdings), _) if !holdings.is_empty() => holdings,
        (_, Some(csv_text)) => match parse_holdings_csv(&csv_text) {
            Ok(holdings) => holdings,
            Err(e) => return bad_request(format!("{e:#}")),
        },
        _ => return bad_request("either holdings or csvText is required".to_string()),
    };
    if holdings.len() > 500 {
        return bad_request("scenario holdings must have at most 500 entries".to_string());
    }

    match storage::scenarios::create_scenario(pool, None, name, &holdings).await {
        Ok(scenario_id) => (
            StatusCode::CREATED,
            Json(ScenarioCreated {
                ok: true,
                scenario_id,
                holdings,
                warnings: Vec::new(),
            }),
        )
            .into_response(),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniverseUploadBody {
    name: String,
    csv_text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UniverseUploaded {
    ok: bool,
    version_id: Uuid,
    row_count: usize,
    warnings: Vec<String>,
}

async fn upload_universe(
    State(state): State<AppState>,
    Json(body): Json<UniverseUploadBody>,
) -> Response {
    let Some(pool) = &state.pool else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let name = body.name.trim();
    let name_len = name.chars().count();
    if !(2..=120).contains(&name_len) {
        return bad_request("universe name must be 2..=120 chars".to_string());
    }

    let parsed = match parse_universe_csv(&body.csv_text) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(format!("{e:#}")),
    };

    match storage::universe::create_universe_version(pool, None, name, &parsed.rows).await {
        Ok(version_id) => (
            StatusCode::CREATED,
            Json(UniverseUploaded {
                ok: true,
                version_id,
                row_count: parsed.rows.len(),
                warnings: parsed.warnings,
            }),
        )
            .into_response(),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndicatorPatchBody {
    #[serde(default)]
    observed_value: Option<f64>,
    #[serde(default)]
    status: Option<IndicatorStatus>,
    #[serde(default)]
    note: Option<String>,
}

async fn observe_indicator(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<IndicatorPatchBody>,
) -> Response {
    let Some(pool) = &state.pool else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let definition = match storage::indicators::fetch_indicator_definition(pool, id).await {
        Ok(Some(definition)) => definition,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // An observed value wins over an explicit status.
    let status = match body.observed_value {
        Some(value) => classify_observed_value(value, &definition),
        None => body.status.unwrap_or(IndicatorStatus::Unknown),
    };

    match storage::indicators::update_indicator_observation(pool, id, status, body.note.as_deref())
        .await
    {
        Ok(()) => Json(json!({ "ok": true, "status": status })).into_response(),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
