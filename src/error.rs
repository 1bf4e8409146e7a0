use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// `axum`-compatible error carrying the caller-facing taxonomy.
///
/// Every error renders as the uniform failure envelope
/// `{"success": false, "error": {"code", "message", "details"?}}`.
pub struct Error {
    status: StatusCode,
    code: &'static str,
    err: anyhow::Error,
    details: Option<serde_json::Value>,
}

impl Error {
    pub fn with_status(status: StatusCode, code: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            code,
            err: err.into(),
            details: None,
        }
    }

    /// Attach a structured detail object (e.g. per-field validation issues).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(err: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, "not_found", err)
    }

    pub fn bad_request(err: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, "bad_request", err)
    }

    /// A transition attempted from a status outside its allowed-from set.
    pub fn invalid_transition(current: crate::models::SubmissionStatus) -> Self {
        Self::with_status(
            StatusCode::BAD_REQUEST,
            "invalid_transition",
            anyhow::anyhow!("transition not allowed from status {current}"),
        )
        .with_details(json!({ "currentStatus": current }))
    }

    pub fn unauthorized(err: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, "unauthorized", err)
    }

    pub fn forbidden(err: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, "forbidden", err)
    }

    pub fn conflict(err: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::CONFLICT, "conflict", err)
    }

    pub fn too_many_requests(retry_after: std::time::Duration) -> Self {
        Self::with_status(
            StatusCode::TOO_MANY_REQUESTS,
            "too_many_requests",
            anyhow::anyhow!("rate limit exceeded"),
        )
        .with_details(json!({ "retryAfterSecs": retry_after.as_secs() }))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            err,
            details: None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {:?}", self.status, self.code, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{:?}", self.err);
        }

        // N.B: Forward the cause chain of internal errors to the requester only in
        // debug builds. Taxonomy errors are caller-facing by design and keep their
        // message in all builds.
        let message = if self.code == "internal" && !cfg!(debug_assertions) {
            "internal error".to_owned()
        } else {
            format!("{:#}", self.err)
        };

        let mut error = json!({
            "code": self.code,
            "message": message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }

        (
            self.status,
            Json(json!({ "success": false, "error": error })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionStatus;

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            Error::not_found(anyhow::anyhow!("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::bad_request(anyhow::anyhow!("x")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::unauthorized(anyhow::anyhow!("x")).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::forbidden(anyhow::anyhow!("x")).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::conflict(anyhow::anyhow!("x")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::too_many_requests(std::time::Duration::from_secs(1)).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_transition_names_current_status() {
        let err = Error::invalid_transition(SubmissionStatus::Rejected);
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
