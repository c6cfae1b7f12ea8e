use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("invalid payment headers: {0}")]
    InvalidPaymentHeaders(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<agentpay::PayError> for ServerError {
    fn from(e: agentpay::PayError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl ResponseError for ServerError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ServerError::ResourceNotFound(id) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "resource_not_found",
                "message": format!("Resource '{id}' not found")
            })),
            ServerError::InvalidPaymentHeaders(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_payment_headers",
                    "message": msg
                }))
            }
            ServerError::Unauthorized(msg) => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": msg
            })),
            ServerError::Forbidden(msg) => HttpResponse::Forbidden().json(serde_json::json!({
                "error": "forbidden",
                "message": msg
            })),
            ServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
