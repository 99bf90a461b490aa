//! Request handlers.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, Instrument};

use super::AppState;
use crate::config::tier_for_role;
use crate::error::ScrapeError;
use crate::models::BatchResult;

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_role")]
    pub userrole: String,
}

fn default_role() -> String {
    "standard".to_string()
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    #[serde(flatten)]
    pub batch: BatchResult,
}

/// Scrape a batch of listing URLs with role-based rate limits.
pub async fn scrape(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ScrapeRequest>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let client_ip = client_ip(&headers, peer);
    let tier = tier_for_role(&payload.userrole);

    let span = tracing::info_span!("scrape_request", %request_id, client = %client_ip);
    let started = Instant::now();

    let outcome = state
        .scrape_service
        .scrape(&payload.urls, &client_ip, &tier)
        .instrument(span)
        .await;

    let elapsed = started.elapsed();
    let mut response = match outcome {
        Ok(batch) => {
            info!(%request_id, elapsed_ms = elapsed.as_millis() as u64, "scrape ok");
            (StatusCode::OK, Json(ScrapeResponse { batch })).into_response()
        }
        Err(e) => {
            info!(%request_id, elapsed_ms = elapsed.as_millis() as u64, error = %e, "scrape failed");
            error_response(e)
        }
    };

    if let Ok(value) = request_id.to_string().parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct PrecacheRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PrecacheResponse {
    pub status: String,
    pub url: String,
    pub cached: bool,
}

/// Warm the cache for a single listing URL under the standard tier.
///
/// Fetch and extraction failures are reported in the `status` field of
/// a 200 response; only validation, rate-limit, and internal failures
/// map to error statuses.
pub async fn precache(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<PrecacheRequest>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let client_ip = client_ip(&headers, peer);
    let tier = tier_for_role("standard");

    let span = tracing::info_span!("precache_request", %request_id, client = %client_ip);
    let started = Instant::now();

    let outcome = state
        .scrape_service
        .precache(&payload.url, &client_ip, &tier)
        .instrument(span)
        .await;

    let elapsed = started.elapsed();
    let mut response = match outcome {
        Ok(status) => {
            info!(
                %request_id,
                elapsed_ms = elapsed.as_millis() as u64,
                status = status.as_str(),
                "precache ok"
            );
            Json(PrecacheResponse {
                status: status.as_str().to_string(),
                url: payload.url,
                cached: status.is_cached(),
            })
            .into_response()
        }
        Err(e) => {
            info!(%request_id, elapsed_ms = elapsed.as_millis() as u64, error = %e, "precache failed");
            error_response(e)
        }
    };

    if let Ok(value) = request_id.to_string().parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Liveness probe.
pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Resolve the client key: proxy headers first, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(ip) = header_value(headers, "fly-client-ip") {
        return ip;
    }
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.ip().to_string()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn error_response(e: ScrapeError) -> Response {
    let (status, kind) = match &e {
        ScrapeError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
        ScrapeError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RateLimited"),
        ScrapeError::Storage(_) | ScrapeError::Backend(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError")
        }
    };

    let body = Json(json!({
        "error": kind,
        "message": e.to_string(),
    }));

    let mut response = (status, body).into_response();
    if let ScrapeError::RateLimited { retry_after_secs } = e {
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.7:443".parse().expect("addr")
    }

    #[test]
    fn fly_header_wins_over_forwarded_and_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("fly-client-ip", "203.0.113.9".parse().expect("header"));
        headers.insert(
            "x-forwarded-for",
            "198.51.100.1, 10.0.0.2".parse().expect("header"),
        );
        assert_eq!(client_ip(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.1, 10.0.0.2".parse().expect("header"),
        );
        assert_eq!(client_ip(&headers, peer()), "198.51.100.1");
    }

    #[test]
    fn falls_back_to_peer_address() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "192.0.2.7");
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = error_response(ScrapeError::RateLimited {
            retry_after_secs: 42,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }
}
