//! Public read-only faucet views.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::ledger::MAX_RECENT_CLAIMS;
use crate::models::faucet::{ClaimView, ClaimsQuery, StatsOverview, WalletCheck, WalletClaimInfo};
use crate::state::AppState;

use super::HttpError;

const DEFAULT_CLAIMS_LIMIT: u64 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/claims", get(get_recent_claims))
        .route("/check/{wallet}", get(check_wallet))
        .route("/wallet/{wallet}", get(get_wallet_claims))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsOverview>, HttpError> {
    Ok(Json(state.reporter.overview(Utc::now()).await?))
}

async fn get_recent_claims(
    Query(query): Query<ClaimsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ClaimView>>, HttpError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CLAIMS_LIMIT)
        .clamp(1, MAX_RECENT_CLAIMS);
    let claims = state.reporter.recent_claims(limit).await?;
    Ok(Json(claims.into_iter().map(ClaimView::from).collect()))
}

async fn check_wallet(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WalletCheck>, HttpError> {
    Ok(Json(state.reporter.check_wallet(&wallet, Utc::now()).await?))
}

async fn get_wallet_claims(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WalletClaimInfo>, HttpError> {
    Ok(Json(state.reporter.claim_info(&wallet).await?))
}
