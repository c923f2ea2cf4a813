//! Route handlers.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

use super::ApiState;
use super::error::ApiError;
use super::types::{ApiResponse, FlushParams, HealthResponse, MessageResponse, RemovedResponse};
use crate::build_info;
use crate::control::Zone;
use crate::decode::{StatsInfo, StatusInfo};
use crate::zonefile::{Record, ZoneFile};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

fn created<T>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

fn message(text: impl Into<String>) -> ApiResult<MessageResponse> {
    ok(MessageResponse {
        message: text.into(),
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(format!("invalid request body: {}", rejection.body_text())))
}

// ── Health ─────────────────────────────────────────────────────────────

pub(super) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: build_info::VERSION.to_string(),
        git_hash: build_info::GIT_HASH.to_string(),
        build_profile: build_info::BUILD_PROFILE.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ── Daemon ─────────────────────────────────────────────────────────────

pub(super) async fn status(State(state): State<Arc<ApiState>>) -> ApiResult<StatusInfo> {
    ok(state.client().status().await?)
}

pub(super) async fn reload(State(state): State<Arc<ApiState>>) -> ApiResult<MessageResponse> {
    message(state.client().reload().await?)
}

pub(super) async fn flush(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<FlushParams>,
) -> ApiResult<MessageResponse> {
    let domain = params.domain.as_deref().map(str::trim).filter(|d| !d.is_empty());
    message(state.client().flush(domain).await?)
}

pub(super) async fn stats(State(state): State<Arc<ApiState>>) -> ApiResult<StatsInfo> {
    ok(state.client().stats().await?)
}

pub(super) async fn info(State(state): State<Arc<ApiState>>) -> ApiResult<MessageResponse> {
    message(state.client().info().await?)
}

// ── Zones ──────────────────────────────────────────────────────────────

fn checked_zone(payload: Result<Json<Zone>, JsonRejection>) -> Result<Zone, ApiError> {
    let zone = body(payload)?;
    zone.validate().map_err(ApiError::invalid)?;
    Ok(zone)
}

pub(super) async fn list_zones(State(state): State<Arc<ApiState>>) -> ApiResult<Vec<Zone>> {
    ok(state.client().list_zones().await?)
}

pub(super) async fn add_zone(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<Zone>, JsonRejection>,
) -> Created<Zone> {
    let zone = checked_zone(payload)?;
    state.client().add_zone(&zone).await?;
    created(zone)
}

pub(super) async fn get_zone(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<Zone> {
    ok(state.client().get_zone(&name).await?)
}

pub(super) async fn update_zone(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    payload: Result<Json<Zone>, JsonRejection>,
) -> ApiResult<Zone> {
    let zone = checked_zone(payload)?;
    if !zone.name.eq_ignore_ascii_case(&name) {
        return Err(ApiError::BadRequest(format!(
            "zone name mismatch: path says {name}, body says {}",
            zone.name
        )));
    }
    state.client().update_zone(&zone).await?;
    ok(zone)
}

pub(super) async fn remove_zone(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<MessageResponse> {
    state.client().remove_zone(&name).await?;
    message(format!("zone {name} removed"))
}

// ── Zone files ─────────────────────────────────────────────────────────

/// A zone file body names its zone either directly or by file name
/// (`example.com.zone` for `example.com`).
fn file_names_zone(file_name: &str, zone: &str) -> bool {
    if file_name.eq_ignore_ascii_case(zone) {
        return true;
    }
    FsPath::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.eq_ignore_ascii_case(zone))
}

fn checked_record(payload: Result<Json<Record>, JsonRejection>) -> Result<Record, ApiError> {
    let record = body(payload)?;
    record.check().map_err(ApiError::invalid)?;
    Ok(record)
}

pub(super) async fn get_zone_file(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<ZoneFile> {
    ok(state.zones.get_zone_file(&name).await?)
}

pub(super) async fn update_zone_file(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    payload: Result<Json<ZoneFile>, JsonRejection>,
) -> ApiResult<ZoneFile> {
    let file = body(payload)?;
    if !file_names_zone(&file.name, &name) {
        return Err(ApiError::BadRequest(format!(
            "zone name mismatch: path says {name}, body says {}",
            file.name
        )));
    }
    let mut errors = Vec::new();
    for (index, record) in file.records.iter().enumerate() {
        if let Err(problems) = record.check() {
            errors.extend(problems.into_iter().map(|p| format!("records[{index}].{p}")));
        }
    }
    if let Some(bad) = file.directives.iter().find(|d| !d.starts_with('$') || d.contains(['\n', '\r'])) {
        errors.push(format!("directives: {bad:?} is not a single $-line"));
    }
    if !errors.is_empty() {
        return Err(ApiError::invalid(errors));
    }

    state.zones.update_zone_file(&name, &file).await?;
    ok(file)
}

// ── Records ────────────────────────────────────────────────────────────

pub(super) async fn add_record(
    State(state): State<Arc<ApiState>>,
    Path(zone): Path<String>,
    payload: Result<Json<Record>, JsonRejection>,
) -> Created<Record> {
    let record = checked_record(payload)?;
    state.zones.add_zone_record(&zone, record.clone()).await?;
    created(record)
}

pub(super) async fn get_record(
    State(state): State<Arc<ApiState>>,
    Path((zone, name, rtype)): Path<(String, String, String)>,
) -> ApiResult<Record> {
    ok(state.zones.get_zone_record(&zone, &name, &rtype).await?)
}

pub(super) async fn update_record(
    State(state): State<Arc<ApiState>>,
    Path((zone, name, rtype)): Path<(String, String, String)>,
    payload: Result<Json<Record>, JsonRejection>,
) -> ApiResult<Record> {
    let record = checked_record(payload)?;
    if !record.matches(&name, &rtype) {
        return Err(ApiError::BadRequest(format!(
            "record mismatch: path says {name}/{rtype}, body says {}/{}",
            record.name, record.rtype
        )));
    }
    state.zones.update_zone_record(&zone, record.clone()).await?;
    ok(record)
}

pub(super) async fn remove_record(
    State(state): State<Arc<ApiState>>,
    Path((zone, name, rtype)): Path<(String, String, String)>,
) -> ApiResult<RemovedResponse> {
    let removed = state.zones.remove_zone_record(&zone, &name, &rtype).await?;
    ok(RemovedResponse { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::body::Body;
    use axum::http::{Method, Request};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tower::ServiceExt;
    use ubctl_config::AppConfig;
    use ubctl_test_utils::config::TEST_API_KEY;
    use ubctl_test_utils::fixtures::{EXAMPLE_ZONE, STATS_OUTPUT, STATUS_OUTPUT};
    use ubctl_test_utils::{FakeDaemon, Reply, TestConfigBuilder};

    use crate::api::router;
    use crate::control::ControlClient;
    use crate::zones::ZoneManager;

    struct Harness {
        app: axum::Router,
        daemon: FakeDaemon,
        zone_path: PathBuf,
        reload_fails: Arc<AtomicBool>,
        _tmp: TempDir,
    }

    async fn harness_with(config: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder) -> Harness {
        let tmp = TempDir::new().unwrap();
        let zone_path = tmp.path().join("example.com.zone");
        std::fs::write(&zone_path, EXAMPLE_ZONE).unwrap();

        let reload_fails = Arc::new(AtomicBool::new(false));
        let zone_json = json!({"name": "example.com", "type": "primary", "file": zone_path}).to_string();
        let daemon = {
            let reload_fails = reload_fails.clone();
            FakeDaemon::unix(move |line| {
                let command = line.strip_prefix("UBCT1  ").unwrap_or(line);
                match command {
                    "status" => Reply::text(STATUS_OUTPUT),
                    "stats" => Reply::text(STATS_OUTPUT),
                    "info" => Reply::text("resolver info"),
                    "reload" if reload_fails.load(Ordering::SeqCst) => Reply::text("error reload failed"),
                    "reload" => Reply::text("ok"),
                    "flush" => Reply::text("ok removed everything"),
                    "list_zones" => Reply::text(format!("[{zone_json}]")),
                    "get_zone example.com" => Reply::text(zone_json.clone()),
                    "remove_zone example.com" => Reply::text("ok"),
                    c if c.starts_with("flush ") => Reply::text("ok"),
                    c if c.starts_with("add_zone ") => Reply::text("ok"),
                    c if c.starts_with("update_zone ") => Reply::text("ok"),
                    other => Reply::text(format!("error unknown zone in {other}")),
                }
            })
            .await
        };

        let config = config(
            TestConfigBuilder::new()
                .control_unix(daemon.socket_path())
                .fast_timeouts(),
        )
        .build();
        let client = Arc::new(ControlClient::from_config(&config.control).unwrap());
        let (_tx, config_rx) = watch::channel::<AppConfig>(config);
        let state = Arc::new(ApiState::new(ZoneManager::new(client), config_rx));

        Harness {
            app: router(state),
            daemon,
            zone_path,
            reload_fails,
            _tmp: tmp,
        }
    }

    async fn harness() -> Harness {
        harness_with(|b| b).await
    }

    fn commands(daemon: &FakeDaemon) -> Vec<String> {
        daemon
            .received()
            .into_iter()
            .map(|l| l.trim_start_matches("UBCT1  ").to_string())
            .collect()
    }

    async fn call(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", TEST_API_KEY);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_needs_no_key() {
        let h = harness().await;
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = h.app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, build_info::VERSION);
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_unauthorized() {
        let h = harness().await;
        let req = Request::get("/api/v1/status").body(Body::empty()).unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::get("/api/v1/status")
            .header("x-api-key", "guess")
            .body(Body::empty())
            .unwrap();
        let resp = h.app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "UNAUTHORIZED");

        assert!(h.daemon.received().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_stats_are_decoded() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["version"], "1.19.3");
        assert_eq!(body["data"]["threads"], 4);

        let (status, body) = call(&h.app, Method::GET, "/api/v1/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["queries"]["total"], 42);
        assert_eq!(body["data"]["queries"]["ip_ratelimited"], 3);
    }

    #[tokio::test]
    async fn test_flush_with_and_without_domain() {
        let h = harness().await;
        let (status, _) = call(&h.app, Method::DELETE, "/api/v1/flush", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&h.app, Method::DELETE, "/api/v1/flush?domain=example.org", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(commands(&h.daemon), vec!["flush", "flush example.org"]);
    }

    #[tokio::test]
    async fn test_daemon_error_is_protocol_error() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api/v1/zones/missing.example", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "PROTOCOL_ERROR");
        assert_eq!(body["error"]["message"], "error unknown zone in get_zone missing.example");
    }

    #[tokio::test]
    async fn test_list_and_add_zone() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api/v1/zones", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["name"], "example.com");

        let zone = json!({"name": "new.example", "type": "forward", "forwards": ["192.0.2.53"]});
        let (status, body) = call(&h.app, Method::POST, "/api/v1/zones", Some(zone)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["name"], "new.example");
        assert_eq!(
            commands(&h.daemon)[1],
            r#"add_zone {"name":"new.example","type":"forward","forwards":["192.0.2.53"]}"#
        );
    }

    #[tokio::test]
    async fn test_invalid_zone_payload_never_reaches_daemon() {
        let h = harness().await;
        let zone = json!({"name": "bad name", "type": "master"});
        let (status, body) = call(&h.app, Method::POST, "/api/v1/zones", Some(zone)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("name: must not contain whitespace"));
        assert!(message.contains("type: must be one of"));

        let (status, _) = call(&h.app, Method::POST, "/api/v1/zones", Some(json!("not a zone"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.daemon.received().is_empty());
    }

    #[tokio::test]
    async fn test_update_zone_sends_update_command() {
        let h = harness().await;
        let zone = json!({"name": "example.com", "type": "primary", "file": "/var/lib/unbound/example.com.zone"});
        let (status, body) = call(&h.app, Method::PUT, "/api/v1/zones/example.com", Some(zone)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "example.com");

        let sent = commands(&h.daemon);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("update_zone {\"name\":\"example.com\""), "{sent:?}");
    }

    #[tokio::test]
    async fn test_update_zone_name_mismatch() {
        let h = harness().await;
        let zone = json!({"name": "other.example", "type": "primary"});
        let (status, _) = call(&h.app, Method::PUT, "/api/v1/zones/example.com", Some(zone)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.daemon.received().is_empty());
    }

    #[tokio::test]
    async fn test_remove_zone() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::DELETE, "/api/v1/zones/example.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["message"], "zone example.com removed");
    }

    #[tokio::test]
    async fn test_zone_file_round_trip() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api/v1/zones/example.com/file", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "example.com.zone");
        assert_eq!(body["data"]["records"].as_array().unwrap().len(), 4);

        // The body returned by GET is accepted as-is by PUT.
        let (status, _) = call(&h.app, Method::PUT, "/api/v1/zones/example.com/file", Some(body["data"].clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(commands(&h.daemon).last().unwrap(), "reload");

        let file = json!({"name": "other.example", "records": []});
        let (status, _) = call(&h.app, Method::PUT, "/api/v1/zones/example.com/file", Some(file)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_lifecycle() {
        let h = harness().await;
        let record = json!({"name": "ftp", "ttl": 600, "type": "A", "rdata": "192.0.2.21"});
        let (status, body) = call(&h.app, Method::POST, "/api/v1/zones/example.com/records", Some(record)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["class"], "IN");

        let (status, body) = call(&h.app, Method::GET, "/api/v1/zones/example.com/records/ftp/A", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rdata"], "192.0.2.21");

        let update = json!({"name": "ftp", "ttl": 60, "type": "A", "rdata": "192.0.2.22"});
        let (status, _) = call(&h.app, Method::PUT, "/api/v1/zones/example.com/records/ftp/A", Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        let on_disk = std::fs::read_to_string(&h.zone_path).unwrap();
        assert!(on_disk.contains("ftp\t60\tIN\tA\t192.0.2.22"));

        let (status, body) = call(&h.app, Method::DELETE, "/api/v1/zones/example.com/records/ftp/A", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["removed"], 1);

        let (status, body) = call(&h.app, Method::GET, "/api/v1/zones/example.com/records/ftp/A", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_record_validation_and_mismatch() {
        let h = harness().await;
        let spaced = json!({"name": "txt", "type": "TXT", "rdata": "two words"});
        let (status, _) = call(&h.app, Method::POST, "/api/v1/zones/example.com/records", Some(spaced)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let other = json!({"name": "www", "type": "AAAA", "rdata": "2001:db8::1"});
        let (status, _) = call(&h.app, Method::PUT, "/api/v1/zones/example.com/records/www/A", Some(other)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(h.daemon.received().is_empty());
    }

    #[tokio::test]
    async fn test_reload_failure_reports_partial_failure() {
        let h = harness().await;
        h.reload_fails.store(true, Ordering::SeqCst);

        let record = json!({"name": "ftp", "type": "A", "rdata": "192.0.2.21"});
        let (status, body) = call(&h.app, Method::POST, "/api/v1/zones/example.com/records", Some(record)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "PARTIAL_FAILURE");
        assert!(body["error"]["details"].as_str().unwrap().contains("example.com.zone"));

        // The file already carries the new record.
        let on_disk = std::fs::read_to_string(&h.zone_path).unwrap();
        assert!(on_disk.contains("192.0.2.21"));
    }

    #[tokio::test]
    async fn test_rate_limit_applies_before_auth() {
        let h = harness_with(|b| b.rate_limit(0.001, 2.0)).await;
        let guess = || {
            Request::get("/api/v1/info")
                .header("x-api-key", "guess")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(h.app.clone().oneshot(guess()).await.unwrap().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.app.clone().oneshot(guess()).await.unwrap().status(), StatusCode::UNAUTHORIZED);
        let resp = h.app.clone().oneshot(guess()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        // Another client still has its own bucket.
        let req = Request::get("/api/v1/info")
            .header("x-api-key", TEST_API_KEY)
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(h.app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn test_file_names_zone() {
        assert!(file_names_zone("example.com", "example.com"));
        assert!(file_names_zone("example.com.zone", "example.com"));
        assert!(file_names_zone("Example.COM.zone", "example.com"));
        assert!(!file_names_zone("example.org.zone", "example.com"));
    }
}
