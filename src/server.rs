use crate::championship::{self, Probabilities, SimulationConfig};
use crate::context::SimulationContext;
use crate::error::SimulationError;
use crate::model::LapQuery;
use crate::race::{Classified, RaceParams};
use crate::request::{LapRow, RaceRequest, RequestLimits, SimulateRequest};
use crate::util::rng;
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AppState {
    pub context: Arc<SimulationContext>,
    pub config: SimulationConfig,
    pub race: RaceParams,
    pub limits: RequestLimits,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/simulate", post(simulate))
        .route("/simulate_race", post(simulate_race))
        .route("/predict_lap_duration", post(predict_lap_duration))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Every failure leaves the server as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    Unavailable(String),
    Internal,
}

impl From<SimulationError> for ApiError {
    fn from(error: SimulationError) -> ApiError {
        match error {
            SimulationError::UnknownCategory { .. } => ApiError::Unprocessable(error.to_string()),
            SimulationError::ModelNotLoaded(_) => ApiError::Unavailable(error.to_string()),
            SimulationError::SessionNotFound(_) => ApiError::NotFound(error.to_string()),
            _ => ApiError::BadRequest(error.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> ApiError {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Unprocessable(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Runs `work` on the blocking pool inside the request's span.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SimulationError> + Send + 'static,
{
    let span = tracing::Span::current();
    match tokio::task::spawn_blocking(move || span.in_scope(work)).await {
        Ok(result) => result.map_err(|e| {
            warn!(error = %e, "rejected request");
            ApiError::from(e)
        }),
        Err(e) => {
            error!(error = %e, "simulation task failed");
            Err(ApiError::Internal)
        }
    }
}

async fn simulate(
    State(state): State<AppState>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Result<Json<Probabilities>, ApiError> {
    let span = info_span!("simulate", request_id = %Uuid::new_v4());
    async move {
        let Json(request) = payload.map_err(|rejection| {
            warn!(%rejection, "malformed body");
            ApiError::from(rejection)
        })?;
        let (standings, events) = request.into_parts(&state.limits).map_err(|e| {
            warn!(error = %e, "rejected request");
            ApiError::from(e)
        })?;
        let context = Arc::clone(&state.context);
        let config = state.config;
        let probabilities = blocking(move || {
            championship::simulate(&context, &standings, &events, &config)
        })
        .await?;
        Ok(Json(probabilities))
    }
    .instrument(span)
    .await
}

async fn simulate_race(
    State(state): State<AppState>,
    payload: Result<Json<RaceRequest>, JsonRejection>,
) -> Result<Json<Vec<Classified>>, ApiError> {
    let span = info_span!("simulate_race", request_id = %Uuid::new_v4());
    async move {
        let Json(request) = payload.map_err(|rejection| {
            warn!(%rejection, "malformed body");
            ApiError::from(rejection)
        })?;
        let context = Arc::clone(&state.context);
        let params = state.race;
        let seed = state.config.seed;
        let classification = blocking(move || {
            let session = request.resolve(context.sessions())?;
            session.simulate(context.degradation(), &params, &mut rng(seed))
        })
        .await?;
        Ok(Json(classification))
    }
    .instrument(span)
    .await
}

#[derive(Debug, Serialize)]
struct LapDurations {
    predicted_laps_durations: Vec<f64>,
}

async fn predict_lap_duration(
    State(state): State<AppState>,
    payload: Result<Json<Vec<LapRow>>, JsonRejection>,
) -> Result<Json<LapDurations>, ApiError> {
    let span = info_span!("predict_lap_duration", request_id = %Uuid::new_v4());
    async move {
        let Json(rows) = payload.map_err(|rejection| {
            warn!(%rejection, "malformed body");
            ApiError::from(rejection)
        })?;
        if rows.is_empty() {
            warn!("empty lap batch");
            return Err(ApiError::BadRequest("no input data provided".to_string()));
        }
        let context = Arc::clone(&state.context);
        let predicted_laps_durations = blocking(move || {
            let model = context
                .degradation()
                .ok_or(SimulationError::ModelNotLoaded("degradation model"))?;
            let queries: Vec<LapQuery<'_>> = rows
                .iter()
                .map(|row| LapQuery {
                    circuit: &row.circuit_short_name,
                    compound: &row.compound,
                    tyre_age: row.current_tyre_age,
                })
                .collect();
            Ok(model.predict(&queries))
        })
        .await?;
        Ok(Json(LapDurations {
            predicted_laps_durations,
        }))
    }
    .instrument(span)
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    version: &'static str,
    simulations: usize,
    race_model: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        simulations: state.config.simulations,
        race_model: state.context.degradation().is_some(),
    })
}
