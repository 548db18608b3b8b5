//! Gateway error taxonomy with per-dialect response envelopes.
//!
//! Every error is mapped to an HTTP status and an error-type string in the
//! dialect the client spoke. The default [`IntoResponse`] impl emits the
//! OpenAI envelope; [`AnthropicError`] wraps the same error for the
//! Anthropic envelope.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::protocol::{anthropic, openai};

/// Shorthand for fallible gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Shorthand for handlers answering in the Anthropic dialect.
pub type AnthropicResult<T> = std::result::Result<T, AnthropicError>;

/// Gateway errors with their HTTP mapping.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Body unreadable, JSON invalid, or a required field missing. No
    /// upstream call was performed.
    #[error("{0}")]
    InvalidRequest(String),

    /// Missing, malformed, unknown, or inactive API key.
    #[error("{0}")]
    Authentication(String),

    /// No active model or upstream for the requested name. The client gets
    /// a generic message; the detail goes to the request log.
    #[error("no route for model '{0}'")]
    ResolveFailed(String),

    /// The inbound protocol cannot be served by the resolved upstream.
    #[error("{0}")]
    DialectMismatch(String),

    /// The upstream answer could not be translated into the inbound
    /// dialect.
    #[error("invalid upstream response: {0}")]
    TranslationResponse(String),

    /// The upstream could not be reached or the connection broke.
    #[error("upstream connection failed: {0}")]
    UpstreamConnection(String),

    /// The circuit breaker is open for this upstream.
    #[error("upstream temporarily unavailable")]
    UpstreamUnavailable,

    /// The upstream answered with an HTTP error; the body is relayed in the
    /// inbound dialect.
    #[error("upstream returned status {status}")]
    UpstreamHttp {
        /// Upstream status code.
        status: u16,
        /// Upstream response body.
        body: String,
    },

    /// Anything that should not leak details to the client.
    #[error("internal server error")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status returned to the client. Upstream 5xx statuses are
    /// downgraded to 502 so gateway failures stay distinguishable from
    /// upstream failures.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::DialectMismatch(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::ResolveFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TranslationResponse(_) | Self::UpstreamConnection(_) | Self::UpstreamUnavailable => {
                StatusCode::BAD_GATEWAY
            }
            Self::UpstreamHttp { status, .. } => match *status {
                500.. => StatusCode::BAD_GATEWAY,
                other => StatusCode::from_u16(other).unwrap_or(StatusCode::BAD_GATEWAY),
            },
        }
    }

    /// Error-type string for the Anthropic envelope.
    pub fn anthropic_error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::DialectMismatch(_) => "invalid_request_error",
            Self::Authentication(_) => "authentication_error",
            Self::ResolveFailed(_) | Self::Internal(_) => "api_error",
            Self::TranslationResponse(_) | Self::UpstreamConnection(_) | Self::UpstreamUnavailable => "api_error",
            Self::UpstreamHttp { status, .. } => match *status {
                400 => "invalid_request_error",
                401 => "authentication_error",
                403 => "permission_error",
                404 => "not_found_error",
                429 => "rate_limit_error",
                _ => "api_error",
            },
        }
    }

    /// Error-type string for the OpenAI envelope.
    pub fn openai_error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::DialectMismatch(_) => "invalid_request_error",
            Self::Authentication(_) => "invalid_api_key",
            Self::ResolveFailed(_) | Self::Internal(_) => "server_error",
            Self::TranslationResponse(_) | Self::UpstreamConnection(_) | Self::UpstreamUnavailable => "server_error",
            Self::UpstreamHttp { status, .. } => match *status {
                400 => "invalid_request_error",
                401 => "invalid_api_key",
                403 => "access_denied",
                404 => "not_found_error",
                429 => "rate_limit_error",
                _ => "server_error",
            },
        }
    }

    /// Message that is safe to show to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::ResolveFailed(_) => "no upstream available for the requested model".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
            Self::UpstreamHttp { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }

    /// Message for the request log, details included.
    pub fn log_message(&self) -> String {
        match self {
            Self::Internal(detail) => detail.clone(),
            Self::UpstreamHttp { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = openai::ErrorResponse::new(self.openai_error_type(), self.client_message(), status.as_u16());

        (status, Json(body)).into_response()
    }
}

/// The same error, answered in the Anthropic envelope.
#[derive(Debug)]
pub struct AnthropicError(pub GatewayError);

impl From<GatewayError> for AnthropicError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl IntoResponse for AnthropicError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = anthropic::ErrorResponse::new(self.0.anthropic_error_type(), self.0.client_message());

        (status, Json(body)).into_response()
    }
}
