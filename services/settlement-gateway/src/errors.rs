use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use ledger_core::AccountId;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Every failure the HTTP surface can report
///
/// Body: `{"error": {"kind", "message", "retryable", "details"}}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Idempotency key was already used for {original_method} {original_path}")]
    IdempotencyConflict {
        original_method: String,
        original_path: String,
        current_path: String,
    },

    #[error("A request with this idempotency key is still being processed")]
    RequestInProgress,

    #[error("Insufficient balance in account {account_id}")]
    InsufficientBalance {
        account_id: AccountId,
        required: Decimal,
        available: Decimal,
    },

    #[error("{rail} rail failure: {message}")]
    RailFailure {
        rail: String,
        message: String,
        retryable: bool,
    },

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::IdempotencyConflict { .. } => "idempotency_conflict",
            ApiError::RequestInProgress => "request_in_progress",
            ApiError::InsufficientBalance { .. } => "insufficient_balance",
            ApiError::RailFailure { .. } => "rail_failure",
            ApiError::Storage(_) => "storage_failure",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ApiError::RailFailure { retryable, .. } => *retryable,
            ApiError::Storage(_) | ApiError::RequestInProgress => true,
            _ => false,
        }
    }

    fn details(&self) -> Value {
        match self {
            ApiError::IdempotencyConflict {
                original_method,
                original_path,
                current_path,
            } => json!({
                "originalMethod": original_method,
                "originalPath": original_path,
                "currentPath": current_path,
            }),
            ApiError::InsufficientBalance {
                account_id,
                required,
                available,
            } => json!({
                "account_id": account_id,
                "required": required,
                "available": available,
                "shortfall": *required - *available,
            }),
            ApiError::RailFailure { rail, retryable, .. } => json!({
                "rail": rail,
                "retryable": retryable,
            }),
            _ => Value::Null,
        }
    }

    /// JSON error body
    pub fn body(&self) -> Value {
        json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
                "retryable": self.retryable(),
                "details": self.details(),
            }
        })
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
            ApiError::RequestInProgress => StatusCode::CONFLICT,
            ApiError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RailFailure { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.body())
    }
}

impl From<ledger_core::Error> for ApiError {
    fn from(err: ledger_core::Error) -> Self {
        use ledger_core::Error;
        match err {
            Error::Validation(msg) => ApiError::Validation(msg),
            Error::InsufficientBalance {
                account_id,
                required,
                available,
            } => ApiError::InsufficientBalance {
                account_id,
                required,
                available,
            },
            Error::AccountNotFound(id) => ApiError::NotFound(format!("Account not found: {}", id)),
            Error::TransferNotFound(id) => ApiError::NotFound(format!("Transfer not found: {}", id)),
            e @ Error::InvalidTransition { .. } => ApiError::Validation(e.to_string()),
            e @ (Error::Storage(_) | Error::LockTimeout(_)) => ApiError::Storage(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<settlement::Error> for ApiError {
    fn from(err: settlement::Error) -> Self {
        use settlement::Error;
        match err {
            Error::Ledger(e) => e.into(),
            Error::Validation(msg) => ApiError::Validation(msg),
            e @ Error::NoRoute { .. } => ApiError::Validation(e.to_string()),
            Error::Rail(e) => ApiError::RailFailure {
                rail: e.rail.to_string(),
                message: e.message,
                retryable: e.retryable,
            },
            Error::QueueItemNotFound(id) => ApiError::NotFound(format!("Queue item not found: {}", id)),
            Error::Store(msg) => ApiError::Storage(msg),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<webhooks::WebhookError> for ApiError {
    fn from(err: webhooks::WebhookError) -> Self {
        use webhooks::WebhookError;
        match err {
            WebhookError::Validation(msg) => ApiError::Validation(msg),
            e @ (WebhookError::EndpointNotFound(_) | WebhookError::DeliveryNotFound(_)) => {
                ApiError::NotFound(e.to_string())
            }
            e @ WebhookError::InvalidState { .. } => ApiError::Validation(e.to_string()),
            WebhookError::Storage(msg) => ApiError::Storage(msg),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Validation(format!("Invalid JSON body: {}", err))
    }
}
