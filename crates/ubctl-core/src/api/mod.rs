//! JSON HTTP API over the control client and zone manager.
//!
//! `GET /health` is open. Everything under `/api/v1` passes the per-client
//! rate limiter first and then the API-key check, so unauthenticated
//! guessing is throttled like any other traffic. Every request is logged
//! once on completion.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::middleware;
use axum::routing::{delete, get, post};
use tokio::sync::watch;
use ubctl_config::AppConfig;

use crate::control::ControlClient;
use crate::zones::ZoneManager;

pub mod auth;
pub mod error;
mod handlers;
pub mod rate_limit;
pub mod request_log;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use rate_limit::RateLimiter;
pub use server::serve;

/// Shared state behind every route.
pub struct ApiState {
    pub zones: ZoneManager,
    /// Latest configuration; the API key is read from here per request.
    pub config: watch::Receiver<AppConfig>,
    pub limiter: Mutex<RateLimiter>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(zones: ZoneManager, config: watch::Receiver<AppConfig>) -> Self {
        let limiter = RateLimiter::new(config.borrow().rate_limit.clone());
        Self {
            zones,
            config,
            limiter: Mutex::new(limiter),
            started_at: Instant::now(),
        }
    }

    pub fn client(&self) -> &ControlClient {
        self.zones.client()
    }
}

/// Build the router with all routes and middleware.
pub fn router(state: Arc<ApiState>) -> Router {
    let api = Router::new()
        .route("/status", get(handlers::status))
        .route("/reload", post(handlers::reload))
        .route("/flush", delete(handlers::flush))
        .route("/stats", get(handlers::stats))
        .route("/info", get(handlers::info))
        .route("/zones", get(handlers::list_zones).post(handlers::add_zone))
        .route(
            "/zones/{name}",
            get(handlers::get_zone)
                .put(handlers::update_zone)
                .delete(handlers::remove_zone),
        )
        .route(
            "/zones/{name}/file",
            get(handlers::get_zone_file).put(handlers::update_zone_file),
        )
        .route("/zones/{name}/records", post(handlers::add_record))
        .route(
            "/zones/{name}/records/{record}/{rtype}",
            get(handlers::get_record)
                .put(handlers::update_record)
                .delete(handlers::remove_record),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(middleware::from_fn(request_log::log_request))
        .with_state(state)
}

/// Client identity for rate limiting and logs: the first `X-Forwarded-For`
/// entry, else `X-Real-IP`, else the peer address.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
