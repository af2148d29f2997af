use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::FaucetError;
use crate::state::AppState;

mod bot;
mod faucet;

pub fn router(state: AppState) -> Router {
    // read-only faucet views are public; the bridge endpoint checks its own token
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let faucet_router = faucet::router().with_state(state.clone());
    let bot_router = bot::router().with_state(state.clone());
    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .nest("/faucet", faucet_router)
        .nest("/bot", bot_router)
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "live",
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let pending_payouts = state.orchestrator.ledger().pending_payouts().await?.len();
    let policy = state.orchestrator.policy();
    Ok(Json(ReadyResponse {
        status: "ready",
        hot_wallet: policy.hot_wallet.clone(),
        currency: policy.asset.currency.clone(),
        pending_payouts,
        bridge_enabled: state.bridge_token.is_some(),
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    hot_wallet: String,
    currency: String,
    pending_payouts: usize,
    bridge_enabled: bool,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }
}

impl From<FaucetError> for HttpError {
    fn from(err: FaucetError) -> Self {
        let status = match &err {
            FaucetError::Validation(_) => StatusCode::BAD_REQUEST,
            FaucetError::Denied(_) | FaucetError::Unauthorized => StatusCode::FORBIDDEN,
            FaucetError::ClaimInProgress | FaucetError::Conflict(_) => StatusCode::CONFLICT,
            FaucetError::PayoutPending { .. } => StatusCode::ACCEPTED,
            FaucetError::PayoutFailed(_) | FaucetError::ExternalService(_) => {
                StatusCode::BAD_GATEWAY
            }
            FaucetError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            FaucetError::Consistency(_) | FaucetError::Database(_) if err.is_transient() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FaucetError::Consistency(_) | FaucetError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {err}");
            Self::new(status, err.user_message())
        } else {
            Self::new(status, err.to_string())
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}
