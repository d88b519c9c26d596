/// HTTP surface: webhook ingress + admin + health
///
/// POST /helius-webhook        one enhanced-tx record or an array
/// POST /admin/refresh-wallets force the tracked-set refresh
/// POST /admin/close-position  manual full exit for a mint
/// GET  /health                liveness
///
/// Webhook verification is a pluggable shared-secret header check; with no
/// secret configured every push is accepted.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::TradeError;
use crate::detector::EnhancedTransaction;
use crate::pipeline::Pipeline;
use crate::wallets::WalletService;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub wallets: Arc<WalletService>,
    pub auth_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/helius-webhook", post(receive_webhook))
        .route("/admin/refresh-wallets", post(refresh_wallets))
        .route("/admin/close-position", post(close_position))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves. A failed bind is
/// fatal by policy.
pub async fn serve(
    state: AppState,
    bind_addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), TradeError> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| TradeError::Fatal(format!("bind {bind_addr}: {e}")))?;
    info!("🌐 listening on {bind_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| TradeError::Fatal(format!("http server: {e}")))
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    if !authorized(state.auth_token.as_deref(), provided) {
        warn!("webhook push rejected: bad auth");
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false})));
    }

    let events = events_from_body(body);
    for event in &events {
        state.pipeline.handle_event(event).await;
    }

    (StatusCode::OK, Json(json!({"ok": true})))
}

async fn refresh_wallets(State(state): State<AppState>) -> impl IntoResponse {
    match state.wallets.refresh().await {
        Ok(tracked) => (
            StatusCode::OK,
            Json(json!({"ok": true, "tracked": tracked})),
        ),
        Err(e) => {
            error!("forced refresh failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
        }
    }
}

async fn close_position(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let Some(mint) = body.get("mint").and_then(|m| m.as_str()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "mint required"})),
        );
    };

    match state.pipeline.close_manual(mint).await {
        Ok(closed) => (
            StatusCode::OK,
            Json(json!({"ok": true, "mint": closed.mint, "reason": closed.reason, "pnl_pct": closed.pnl_pct})),
        ),
        Err(e) => {
            error!("manual close for {mint} failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
        }
    }
}

/// Shared-secret verification hook. No configured secret accepts anything.
fn authorized(expected: Option<&str>, provided: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(want) => provided == Some(want),
    }
}

/// The provider pushes either a single record or a batch array; malformed
/// entries are dropped with a warning rather than failing the request.
fn events_from_body(body: Value) -> Vec<EnhancedTransaction> {
    let raw_events = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    raw_events
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<EnhancedTransaction>(v) {
            Ok(tx) => Some(tx),
            Err(e) => {
                warn!("dropping malformed webhook record: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_accepts_when_no_secret() {
        assert!(authorized(None, None));
        assert!(authorized(None, Some("whatever")));
    }

    #[test]
    fn test_authorized_requires_exact_match() {
        assert!(authorized(Some("s3cret"), Some("s3cret")));
        assert!(!authorized(Some("s3cret"), Some("wrong")));
        assert!(!authorized(Some("s3cret"), None));
    }

    #[test]
    fn test_events_from_single_and_batch_bodies() {
        let single = json!({"signature": "S1", "tokenTransfers": [], "nativeTransfers": []});
        let events = events_from_body(single);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature, "S1");

        let batch = json!([
            {"signature": "S1"},
            {"signature": "S2"},
        ]);
        assert_eq!(events_from_body(batch).len(), 2);
    }

    #[test]
    fn test_malformed_records_are_dropped() {
        let batch = json!([
            {"signature": "S1"},
            "not-an-object-but-tolerated-or-dropped",
            42,
        ]);
        let events = events_from_body(batch);
        // strings/numbers cannot deserialize into a record and are dropped
        assert_eq!(events.len(), 1);
    }
}
