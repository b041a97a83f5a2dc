use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Gateway-level failures, mapped onto OpenAI-style error bodies.
///
/// `Request` and `UnknownModel` are rejected before any backend call is
/// made. `Backend` and `Timeout` surface solver-side failures. `Transport`
/// means the client went away; it is never rendered to anyone, but routes
/// still need a value to bubble up.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Request(String),

    #[error("model '{0}' is not known to this gateway")]
    UnknownModel(String),

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("{0}")]
    Timeout(String),

    #[error("client disconnected")]
    Transport,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Request(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownModel(_) => StatusCode::NOT_FOUND,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Transport => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Request(_) => "invalid_request",
            GatewayError::UnknownModel(_) => "model_not_found",
            GatewayError::Backend(_) => "backend_error",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Transport => "client_disconnected",
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status()).json(json!({
            "error": {
                "message": self.to_string(),
                "type": status_type_str(self.status()),
                "code": self.code(),
            }
        }))
    }
}

/// OpenAI error bodies carry a snake_case rendering of the HTTP status in
/// their `type` field.
pub fn status_type_str(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
        StatusCode::INTERNAL_SERVER_ERROR => "internal_server_error",
        StatusCode::BAD_GATEWAY => "bad_gateway",
        StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
        StatusCode::GATEWAY_TIMEOUT => "gateway_timeout",
        _ => "error",
    }
}
