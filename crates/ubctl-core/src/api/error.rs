//! Mapping of library errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::types::{ApiResponse, ErrorBody};
use crate::control::ControlError;
use crate::zones::ZoneError;

/// Everything a handler or middleware can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("too many requests")]
    RateLimited,
}

impl ApiError {
    /// Validation failures joined into one message.
    pub fn invalid(errors: Vec<String>) -> Self {
        ApiError::BadRequest(format!("invalid payload: {}", errors.join("; ")))
    }

    /// HTTP status, stable code, and optional details.
    pub fn classify(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            ApiError::Control(e) => classify_control(e),
            ApiError::Zone(e) => match e {
                ZoneError::Control(e) => classify_control(e),
                ZoneError::NoFile(_) => (StatusCode::CONFLICT, "ZONE_HAS_NO_FILE", None),
                ZoneError::File(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ZONE_FILE_ERROR", None),
                ZoneError::PartialFailure { path, .. } => (
                    StatusCode::BAD_GATEWAY,
                    "PARTIAL_FAILURE",
                    Some(format!(
                        "{} was saved; the daemon is still serving the previous data until a reload succeeds (POST /api/v1/reload)",
                        path.display()
                    )),
                ),
                ZoneError::RecordNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", None),
        }
    }
}

fn classify_control(error: &ControlError) -> (StatusCode, &'static str, Option<String>) {
    match error {
        ControlError::Transport(t) if t.is_timeout() => {
            (StatusCode::GATEWAY_TIMEOUT, "TRANSPORT_ERROR", None)
        }
        ControlError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", None),
        ControlError::Protocol(_) | ControlError::Decode { .. } => {
            (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR", None)
        }
        ControlError::InvalidCommand(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
        ControlError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.classify();
        let body = ApiResponse::<()>::failure(ErrorBody {
            code: code.to_string(),
            message: self.to_string(),
            details,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::control::TransportError;
    use crate::zonefile::ZoneFileError;

    #[test]
    fn test_transport_errors() {
        let timeout = ApiError::from(ControlError::from(TransportError::Timeout {
            op: "read",
            after: Duration::from_secs(5),
        }));
        assert_eq!(timeout.classify().0, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.classify().1, "TRANSPORT_ERROR");

        let eof = ApiError::from(ControlError::from(TransportError::EmptyEof));
        assert_eq!(eof.classify().0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_protocol_error_passes_daemon_text() {
        let err = ApiError::from(ControlError::Protocol("error zone not found".to_string()));
        assert_eq!(err.classify().1, "PROTOCOL_ERROR");
        assert_eq!(err.to_string(), "error zone not found");
    }

    #[test]
    fn test_zone_errors() {
        let no_file = ApiError::from(ZoneError::NoFile("fwd.example".to_string()));
        assert_eq!(no_file.classify().0, StatusCode::CONFLICT);

        let file = ApiError::from(ZoneError::File(ZoneFileError::Read {
            path: PathBuf::from("/z"),
            source: std::io::Error::other("boom"),
        }));
        assert_eq!(file.classify().1, "ZONE_FILE_ERROR");

        let missing = ApiError::from(ZoneError::RecordNotFound {
            zone: "example.com".to_string(),
            name: "www".to_string(),
            rtype: "A".to_string(),
        });
        assert_eq!(missing.classify().0, StatusCode::NOT_FOUND);

        let nested = ApiError::from(ZoneError::Control(ControlError::Protocol("error".to_string())));
        assert_eq!(nested.classify().1, "PROTOCOL_ERROR");
    }

    #[test]
    fn test_partial_failure_has_details() {
        let err = ApiError::from(ZoneError::PartialFailure {
            path: PathBuf::from("/var/lib/unbound/example.com.zone"),
            source: ControlError::Protocol("error reload failed".to_string()),
        });
        let (status, code, details) = err.classify();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(code, "PARTIAL_FAILURE");
        assert!(details.unwrap().contains("/var/lib/unbound/example.com.zone"));
    }

    #[test]
    fn test_request_errors() {
        assert_eq!(
            ApiError::invalid(vec!["name: must not be empty".to_string()]).classify().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized("missing API key").classify().1, "UNAUTHORIZED");
        assert_eq!(ApiError::RateLimited.classify().0, StatusCode::TOO_MANY_REQUESTS);
    }
}
