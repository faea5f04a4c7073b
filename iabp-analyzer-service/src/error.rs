//! Error types for the analysis client and their mapping onto HTTP responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use iabp_session::SessionError;
use serde::Serialize;
use thiserror::Error;

/// Failures of the outbound model call and of the inputs it needs.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No API key available. Set ANTHROPIC_API_KEY or enter a key for this session.")]
    MissingCredential,

    #[error("The API key was rejected by the provider: {0}")]
    InvalidCredential(String),

    #[error("Insufficient provider quota: {0}")]
    QuotaExceeded(String),

    #[error("The provider is rate limiting requests: {0}")]
    ProviderRateLimited(String),

    #[error("The analysis provider is unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("The provider rejected the request: {0}")]
    InvalidRequest(String),

    #[error("Image is {size} bytes, above the {limit} byte upload limit")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("Unsupported image format: {0}. Upload a PNG or JPEG file.")]
    UnsupportedImage(String),

    #[error("Unable to compress image sufficiently for API limits")]
    ImageNotCompressible,

    #[error("Could not read the model response: {0}")]
    MalformedResponse(String),
}

impl AnalysisError {
    /// Transient failures that may succeed on a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::ProviderUnavailable(_))
    }
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u128>,
}

/// Error returned by every handler
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Locked")]
    Locked,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after_ms: u128 },

    #[error("Upstream {kind}: {message}")]
    Upstream { kind: &'static str, message: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Locked => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::SessionNotFound(id) => ApiError::NotFound(format!("Session {}", id)),
            SessionError::RateLimited { retry_after } => ApiError::RateLimited {
                message,
                retry_after_ms: retry_after.as_millis(),
            },
            SessionError::Locked => ApiError::Locked,
            SessionError::IncorrectPassword => ApiError::Forbidden(message),
            SessionError::InvalidParameter { .. } => ApiError::BadRequest(message),
            SessionError::StorageError(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        let message = err.to_string();
        match err {
            AnalysisError::MissingCredential => ApiError::BadRequest(message),
            AnalysisError::ImageTooLarge { .. } => ApiError::PayloadTooLarge(message),
            AnalysisError::UnsupportedImage(_) => ApiError::UnsupportedMedia(message),
            AnalysisError::ImageNotCompressible => ApiError::BadRequest(message),
            AnalysisError::InvalidCredential(_) => ApiError::Upstream {
                kind: "invalid_credential",
                message,
            },
            AnalysisError::QuotaExceeded(_) => ApiError::Upstream {
                kind: "quota_exceeded",
                message,
            },
            AnalysisError::ProviderRateLimited(_) => ApiError::Upstream {
                kind: "provider_rate_limited",
                message,
            },
            AnalysisError::InvalidRequest(_) => ApiError::Upstream {
                kind: "invalid_request",
                message,
            },
            AnalysisError::MalformedResponse(_) => ApiError::Upstream {
                kind: "malformed_response",
                message,
            },
            AnalysisError::ProviderUnavailable(_) => ApiError::ServiceUnavailable(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, message, retry_after_ms) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None),
            ApiError::NotFound(resource) => ("not_found", format!("{} not found", resource), None),
            ApiError::Locked => (
                "locked",
                "Enter the application password to continue".to_string(),
                None,
            ),
            ApiError::Forbidden(msg) => ("forbidden", msg, None),
            ApiError::PayloadTooLarge(msg) => ("payload_too_large", msg, None),
            ApiError::UnsupportedMedia(msg) => ("unsupported_media_type", msg, None),
            ApiError::RateLimited {
                message,
                retry_after_ms,
            } => ("rate_limited", message, Some(retry_after_ms)),
            ApiError::Upstream { kind, message } => (kind, message, None),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg, None),
            ApiError::Internal(msg) => ("internal_error", msg, None),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            retry_after_ms,
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(ms) = retry_after_ms {
            let secs = ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limited_maps_to_429_with_retry_after() {
        let err: ApiError = SessionError::RateLimited {
            retry_after: Duration::from_millis(1200),
        }
        .into();
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }

    #[test]
    fn test_analysis_error_status_mapping() {
        let cases = [
            (AnalysisError::MissingCredential, StatusCode::BAD_REQUEST),
            (
                AnalysisError::ImageTooLarge { size: 11, limit: 10 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                AnalysisError::UnsupportedImage("gif".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                AnalysisError::InvalidCredential("bad".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AnalysisError::ProviderUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Upstream {
            kind: "quota_exceeded",
            message: "credit balance is too low".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Upstream quota_exceeded: credit balance is too low"
        );
        assert_eq!(ApiError::Locked.to_string(), "Locked");
    }

    #[test]
    fn test_only_outages_are_transient() {
        assert!(AnalysisError::ProviderUnavailable("529".into()).is_transient());
        assert!(!AnalysisError::QuotaExceeded("credit".into()).is_transient());
        assert!(!AnalysisError::InvalidCredential("401".into()).is_transient());
    }
}
