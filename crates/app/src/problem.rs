use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use domain_push_storage::DomainError;

use crate::domains::DomainServiceError;
use crate::push::PushError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// RFC 7807 error body served as `application/problem+json`.
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    fn internal(problem_type: &'static str, err: &dyn std::error::Error) -> Self {
        error!(stage = "api", problem_type, error = %err, "request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            problem_type,
            "internal error, see server logs",
        )
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<DomainServiceError> for ProblemResponse {
    fn from(err: DomainServiceError) -> Self {
        let detail = err.to_string();
        match err {
            DomainServiceError::InvalidSite(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_site", detail)
            }
            DomainServiceError::InvalidHostname(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_hostname", detail)
            }
            DomainServiceError::Domain(DomainError::NotFound) => {
                Self::new(StatusCode::NOT_FOUND, "domain_not_found", detail)
            }
            DomainServiceError::Domain(DomainError::SiteNotFound) => {
                Self::new(StatusCode::NOT_FOUND, "site_not_found", detail)
            }
            DomainServiceError::Domain(DomainError::DuplicateHostname(_)) => {
                Self::new(StatusCode::CONFLICT, "duplicate_hostname", detail)
            }
            DomainServiceError::Domain(DomainError::PrimaryDomain) => {
                Self::new(StatusCode::CONFLICT, "domain_ownership", detail)
            }
            DomainServiceError::LockTimeout(_) => {
                Self::new(StatusCode::CONFLICT, "lock_timeout", detail)
            }
            other => Self::internal("storage_error", &other),
        }
    }
}

impl From<PushError> for ProblemResponse {
    fn from(err: PushError) -> Self {
        let detail = err.to_string();
        match err {
            PushError::NotFound => Self::new(StatusCode::NOT_FOUND, "domain_not_found", detail),
            PushError::LockTimeout(_) => Self::new(StatusCode::CONFLICT, "lock_timeout", detail),
            PushError::StaleState => Self::new(StatusCode::CONFLICT, "stale_state", detail),
            other => Self::internal("push_error", &other),
        }
    }
}
