use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde_json::json;

/// Structured detail for a JSON Schema validation failure, surfaced alongside `BrokerError::Validation`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationDetail {
    pub path: String,
    pub constraint: String,
    pub expected: String,
    pub actual: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("validation failed: {message}")]
    SchemaValidation {
        message: String,
        detail: ValidationDetail,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::NotFound(_) => "NOT_FOUND",
            BrokerError::Duplicate(_) => "DUPLICATE",
            BrokerError::Validation(_) | BrokerError::SchemaValidation { .. } => "VALIDATION",
            BrokerError::Unauthorized(_) => "UNAUTHORIZED",
            BrokerError::Forbidden(_) => "FORBIDDEN",
            BrokerError::QueueFull(_) => "QUEUE_FULL",
            BrokerError::RateLimited(_) => "RATE_LIMITED",
            BrokerError::ProtocolMismatch(_) => "PROTOCOL_MISMATCH",
            BrokerError::InvalidState(_) => "INVALID_STATE",
            BrokerError::Expired(_) => "EXPIRED",
            BrokerError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> Status {
        match self {
            BrokerError::NotFound(_) => Status::NotFound,
            BrokerError::Duplicate(_) => Status::Conflict,
            BrokerError::Validation(_) | BrokerError::SchemaValidation { .. } => Status::BadRequest,
            BrokerError::Unauthorized(_) => Status::Unauthorized,
            BrokerError::Forbidden(_) => Status::Forbidden,
            BrokerError::QueueFull(_) => Status::InsufficientStorage,
            BrokerError::RateLimited(_) => Status::TooManyRequests,
            BrokerError::ProtocolMismatch(_) => Status::Conflict,
            BrokerError::InvalidState(_) => Status::Conflict,
            BrokerError::Expired(_) => Status::Gone,
            BrokerError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl From<rusqlite::Error> for BrokerError {
    fn from(e: rusqlite::Error) -> Self {
        BrokerError::Internal(format!("store error: {e}"))
    }
}

impl<'r> Responder<'r, 'static> for BrokerError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        if matches!(self, BrokerError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = match &self {
            BrokerError::SchemaValidation { message, detail } => json!({
                "error": self.kind(),
                "message": message,
                "detail": detail,
            }),
            other => json!({
                "error": other.kind(),
                "message": other.to_string(),
            }),
        };
        let status = self.status();
        let mut res = Json(body).respond_to(req)?;
        res.set_status(status);
        Ok(res)
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
