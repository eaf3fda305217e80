//! Tally HTTP surface: records vote/predict/claim events and serves balances
//! and chart metadata.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tally_core::{AppError, Settings, config::parse_instant};
use tally_engine::recorder::{self, EventKind, NewEvent, RecorderConfig};
use tally_engine::metadata;
use tally_storage::KvStore;
use tally_storage::models::Amounts;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Shared application state.
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub settings: Settings,
    pub recorder: RecorderConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, settings: Settings) -> Self {
        let recorder = RecorderConfig::from_settings(&settings);
        Self { store, settings, recorder }
    }
}

/// Build the full router, CORS included.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);

    Router::new()
        .route("/vote", post(vote))
        .route("/predict", post(predict))
        .route("/claim", post(claim))
        .route("/reclaim", post(reclaim))
        .route("/balances/:wallet", get(get_balance))
        .route("/balance/:wallet", get(get_balance))
        .route("/claim/:wallet", get(get_balance))
        .route("/check/:wallet", get(check_wallet))
        .route("/metadata", get(get_metadata))
        .route("/claims", get(get_metadata))
        .route("/balances", get(get_metadata))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(options_no_content))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect::<Vec<_>>(),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Answer every OPTIONS request with 204, keeping the CORS headers.
async fn options_no_content(req: Request, next: Next) -> Response {
    if req.method() != Method::OPTIONS {
        return next.run(req).await;
    }

    let (mut parts, _) = next.run(req).await.into_parts();
    parts.headers.remove(header::CONTENT_TYPE);
    parts.headers.remove(header::CONTENT_LENGTH);

    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().extend(parts.headers);
    response
}

// ─── Request Types ──────────────────────────────────────────────────────────

/// Body of the write endpoints. Amounts may be JSON numbers or numeric strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EventBody {
    wallet: Option<String>,
    anti_tokens: Option<Value>,
    pro_tokens: Option<Value>,
    baryon_tokens: Option<Value>,
    photon_tokens: Option<Value>,
    signature: Option<String>,
    timestamp: Option<String>,
}

impl EventBody {
    fn parse(body: &[u8]) -> Result<NewEvent, AppError> {
        let body: EventBody = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))?;

        let wallet = body.wallet.map(|w| w.trim().to_string()).unwrap_or_default();
        let signature = body.signature.unwrap_or_default();
        if wallet.is_empty() || signature.trim().is_empty() {
            return Err(AppError::Validation("Missing wallet or signature".into()));
        }

        let amounts = Amounts::new(
            parse_amount("antiTokens", body.anti_tokens)?,
            parse_amount("proTokens", body.pro_tokens)?,
            parse_amount("baryonTokens", body.baryon_tokens)?,
            parse_amount("photonTokens", body.photon_tokens)?,
        );

        let timestamp = body
            .timestamp
            .map(|raw| parse_instant(&raw).map_err(AppError::Validation))
            .transpose()?;

        Ok(NewEvent { wallet, amounts, signature, timestamp })
    }
}

fn parse_amount(field: &str, value: Option<Value>) -> Result<f64, AppError> {
    let parsed = match &value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::Validation(format!("{field} must be a finite number")))
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    has_voted: bool,
}

fn json_ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

fn json_err(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: msg.to_string(),
        }),
    )
        .into_response()
}

/// Maps [`AppError`] onto HTTP statuses. Server-side failures are logged and
/// answered with a generic message.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            AppError::Validation(msg) => json_err(StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => json_err(StatusCode::NOT_FOUND, msg),
            other => {
                tracing::error!(error = %other, "Request failed");
                json_err(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> Response {
    json_err(StatusCode::NOT_FOUND, "Not found")
}

async fn record(state: &AppState, kind: EventKind, body: &[u8]) -> Result<Response, ApiError> {
    let event = EventBody::parse(body).inspect_err(|e| {
        tracing::debug!(kind = kind.as_str(), error = %e, "Rejected event");
    })?;
    let receipt = recorder::record_event(state.store.as_ref(), &state.recorder, kind, event).await?;
    Ok(json_ok(receipt).into_response())
}

/// POST /vote — record a vote (sign +1).
async fn vote(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    record(&state, EventKind::Vote, &body).await
}

/// POST /predict — record a prediction (sign +1).
async fn predict(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    record(&state, EventKind::Predict, &body).await
}

/// POST /claim — record a claim (sign -1).
async fn claim(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    record(&state, EventKind::Claim, &body).await
}

/// POST /reclaim — record a reclaim (sign -1).
async fn reclaim(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    record(&state, EventKind::Reclaim, &body).await
}

/// GET /balances/:wallet — current projection balance, zeros if unknown.
async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let balance =
        recorder::balance_of(state.store.as_ref(), &state.recorder.projection_key, &wallet)
            .await?;
    Ok(json_ok(balance))
}

/// GET /check/:wallet — whether the wallet has recorded anything.
async fn check_wallet(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let has_voted = recorder::has_recorded(state.store.as_ref(), &wallet).await?;
    Ok(json_ok(CheckResponse { has_voted }))
}

/// GET /metadata — time series, cumulative series and histograms.
async fn get_metadata(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let payload =
        metadata::collect_metadata(state.store.as_ref(), &state.settings, Utc::now()).await?;
    Ok(json_ok(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_accept_numbers_and_numeric_strings() {
        assert_eq!(parse_amount("a", Some(serde_json::json!(12))).expect("int"), 12.0);
        assert_eq!(parse_amount("a", Some(serde_json::json!("-3.5"))).expect("str"), -3.5);
        assert!(parse_amount("a", Some(serde_json::json!("abc"))).is_err());
        assert!(parse_amount("a", Some(serde_json::json!("NaN"))).is_err());
        assert!(parse_amount("a", Some(serde_json::json!(null))).is_err());
        assert!(parse_amount("a", None).is_err());
    }

    #[test]
    fn body_requires_wallet_and_signature() {
        let err = EventBody::parse(br#"{"wallet":"W1","antiTokens":1,"proTokens":0,"baryonTokens":0,"photonTokens":0}"#)
            .expect_err("no signature");
        assert_eq!(err.to_string(), "Validation error: Missing wallet or signature");

        let err = EventBody::parse(br#"{"wallet":"W1","signature":"s","antiTokens":1,"proTokens":0,"baryonTokens":0,"photonTokens":0,"extra":1}"#)
            .expect_err("unknown field");
        assert!(err.to_string().contains("Invalid request body"));

        let event = EventBody::parse(br#"{"wallet":" W1 ","signature":"s","antiTokens":"1","proTokens":2,"baryonTokens":0,"photonTokens":0,"timestamp":"2025-01-01T00:00Z"}"#)
            .expect("valid");
        assert_eq!(event.wallet, "W1");
        assert_eq!(event.amounts, Amounts::new(1.0, 2.0, 0.0, 0.0));
        assert!(event.timestamp.is_some());
    }
}
