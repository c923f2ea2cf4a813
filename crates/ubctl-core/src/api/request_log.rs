//! One log line per HTTP request.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, info, warn};

use super::client_ip;

pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_ip(&request);
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    if status.is_server_error() {
        error!(%method, path = %path, client = %client, status = status.as_u16(), latency_ms, "request failed");
    } else if status.is_client_error() {
        warn!(%method, path = %path, client = %client, status = status.as_u16(), latency_ms, "request rejected");
    } else {
        info!(%method, path = %path, client = %client, status = status.as_u16(), latency_ms, "request served");
    }
    response
}
