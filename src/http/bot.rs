//! Chat bridge endpoint. The bridge relays room messages here and posts the
//! returned reply back into the room.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::bot::CommandContext;
use crate::identity::MAX_USER_ID_LEN;
use crate::models::faucet::{BotCommandRequest, BotCommandResponse};
use crate::state::AppState;

use super::HttpError;

const MAX_BODY_LEN: usize = 4096;

pub fn router() -> Router<AppState> {
    Router::new().route("/command", post(handle_command))
}

async fn handle_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BotCommandRequest>,
) -> Result<Json<BotCommandResponse>, HttpError> {
    authorize_bridge(&state, &headers)?;

    if request.sender.trim().is_empty() || request.sender.len() > MAX_USER_ID_LEN {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "sender must be a chat user id".to_string(),
        ));
    }
    if request.body.len() > MAX_BODY_LEN {
        return Err(HttpError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("message body exceeds {MAX_BODY_LEN} bytes"),
        ));
    }

    let ctx = CommandContext {
        sender: request.sender,
        room_id: request.room_id,
    };
    let reply = state.dispatcher.handle(&ctx, &request.body).await;
    Ok(Json(BotCommandResponse { reply }))
}

fn authorize_bridge(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(expected) = &state.bridge_token else {
        return Err(HttpError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "chat bridge is not configured".to_string(),
        ));
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match provided {
        Some(token) if tokens_match(token, expected.expose_secret()) => Ok(()),
        _ => {
            warn!("Rejected bot command with missing or invalid bridge token");
            Err(HttpError::new(
                StatusCode::UNAUTHORIZED,
                "invalid bridge token".to_string(),
            ))
        }
    }
}

/// Compares digests so the time taken does not depend on how much of the
/// secret a guess gets right.
fn tokens_match(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::http::tests::{BRIDGE_TOKEN, send, test_state};
    use crate::test_support::ALICE;

    fn command(token: Option<&str>, sender: &str, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/bot/command")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let payload = json!({ "sender": sender, "room_id": "!room:textrp.io", "body": body });
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    #[tokio::test]
    async fn relays_commands_to_dispatcher() {
        let state = test_state().await;
        let sender = format!("@{ALICE}:matrix.textrp.io");

        let (status, body) = send(state.clone(), command(Some(BRIDGE_TOKEN), &sender, "!ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].as_str().unwrap().contains("Pong"));

        let (status, body) = send(state.clone(), command(Some(BRIDGE_TOKEN), &sender, "!faucet")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].as_str().unwrap().contains("100"));
        assert_eq!(state.reporter.get_stats().await.unwrap().total_claims, 1);

        let (status, body) = send(state, command(Some(BRIDGE_TOKEN), &sender, "just chatting")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].is_null());
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        let state = test_state().await;
        let (status, _) = send(state.clone(), command(None, "@someone:textrp.io", "!ping")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(state, command(Some("guess"), "@someone:textrp.io", "!ping")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match(BRIDGE_TOKEN, BRIDGE_TOKEN));
        assert!(!tokens_match("bridge-secreT", BRIDGE_TOKEN));
        assert!(!tokens_match("bridge-secret-longer", BRIDGE_TOKEN));
        assert!(!tokens_match("", BRIDGE_TOKEN));
    }

    #[tokio::test]
    async fn disabled_without_configured_token() {
        let mut state = test_state().await;
        state.bridge_token = None;
        let (status, _) = send(state, command(Some(BRIDGE_TOKEN), "@someone:textrp.io", "!ping")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
