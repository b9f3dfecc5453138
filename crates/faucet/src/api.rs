//! HTTP API for faucet service

use super::error::{ErrorKind, FaucetError, FaucetResult};
use super::service::{FaucetService, FaucetStatus, RequestedAmount};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const FALLBACK_ORIGIN: &str = "127.0.0.1";

/// Dispense request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseRequest {
    pub wallet_address: Option<String>,
    pub amount: Option<RequestedAmount>,
}

/// Remaining-quota query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingQuery {
    pub wallet_address: Option<String>,
}

/// Body of every faucet response
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<u32>,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

/// Build the faucet router.
pub fn router(service: Arc<FaucetService>, cors_enabled: bool) -> Router {
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/api/faucet", get(remaining_handler).post(dispense_handler))
        .with_state(service)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(cors)
    } else {
        app
    }
}

/// Caller origin used for quota bucketing: first `x-forwarded-for` hop,
/// then `x-real-ip`, then the socket peer.
pub fn client_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| FALLBACK_ORIGIN.to_string())
}

fn failure(err: FaucetError, remaining_requests: Option<u32>) -> Response {
    let status = err.status_code();
    let body = FaucetResponse {
        success: false,
        error: Some(err.to_string()),
        error_kind: Some(err.kind()),
        remaining_requests,
        ..Default::default()
    };
    (status, Json(body)).into_response()
}

/// Dispense handler
pub async fn dispense_handler(
    State(service): State<Arc<FaucetService>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<DispenseRequest>, JsonRejection>,
) -> Response {
    let origin = client_origin(&headers, peer.map(|ConnectInfo(addr)| addr));

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return failure(
                FaucetError::Validation(format!("Invalid request body: {}", rejection.body_text())),
                None,
            );
        }
    };

    let wallet = match request.wallet_address {
        Some(wallet) if !wallet.trim().is_empty() => wallet,
        _ => {
            return failure(
                FaucetError::Validation("walletAddress is required".to_string()),
                None,
            )
        }
    };

    info!("Dispense request from {}: wallet={}", origin, wallet);

    // Run to completion even if the client goes away, so a confirmed
    // transfer is always recorded against the quota.
    let task = {
        let service = service.clone();
        let wallet = wallet.clone();
        let origin = origin.clone();
        let amount = request.amount;
        tokio::spawn(async move { service.dispense(&wallet, amount.as_ref(), &origin).await })
    };
    let outcome = task.await.unwrap_or_else(|e| {
        error!("Dispense task aborted: {}", e);
        Err(FaucetError::Internal("dispense task aborted".to_string()))
    });

    let remaining_requests = Some(service.remaining_requests(&wallet, &origin));

    match outcome {
        Ok(receipt) => (
            StatusCode::OK,
            Json(FaucetResponse {
                success: true,
                transaction_signature: Some(receipt.signature.to_string()),
                remaining_requests,
                ..Default::default()
            }),
        )
            .into_response(),
        Err(err) => failure(err, remaining_requests),
    }
}

/// Remaining-quota handler
pub async fn remaining_handler(
    State(service): State<Arc<FaucetService>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<RemainingQuery>,
) -> Response {
    let wallet = match query.wallet_address {
        Some(wallet) if !wallet.trim().is_empty() => wallet,
        _ => {
            return failure(
                FaucetError::Validation("walletAddress parameter is required".to_string()),
                None,
            )
        }
    };
    let origin = client_origin(&headers, peer.map(|ConnectInfo(addr)| addr));

    Json(FaucetResponse {
        success: true,
        remaining_requests: Some(service.remaining_requests(&wallet, &origin)),
        ..Default::default()
    })
    .into_response()
}

/// Status handler
pub async fn status_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<FaucetStatus>>> {
    let status = service.status().await?;
    Ok(Json(SuccessResponse {
        data: status,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> Result<String, StatusCode> {
    service.metrics().gather().map_err(|err| {
        error!("Failed to gather metrics: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Drip Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "SPL test token faucet with per-wallet/IP daily quota",
        "endpoints": {
            "POST /api/faucet": "Request tokens",
            "GET /api/faucet?walletAddress=": "Remaining requests for a wallet",
            "GET /api/status": "Get faucet status",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_origin_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        let peer: SocketAddr = "9.9.9.9:4000".parse().unwrap();
        assert_eq!(client_origin(&headers, Some(peer)), "1.2.3.4");
    }

    #[test]
    fn test_origin_falls_back_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_origin(&headers, None), "5.6.7.8");

        let peer: SocketAddr = "9.9.9.9:4000".parse().unwrap();
        assert_eq!(client_origin(&HeaderMap::new(), Some(peer)), "9.9.9.9");
        assert_eq!(client_origin(&HeaderMap::new(), None), "127.0.0.1");
    }
}
