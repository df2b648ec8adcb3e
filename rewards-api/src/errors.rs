use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rewards_core::ErrorKind;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by the HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Rewards(#[from] rewards_core::Error),

    #[error("Validation error: {0}")]
    BadRequest(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = match status_code {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable, retry".to_string(),
            _ => self.to_string(),
        };
        if status_code.is_server_error() {
            tracing::error!(error = %self, status = status_code.as_u16(), "Request failed");
        }

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Rewards(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
                ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    fn error_type(&self) -> &str {
        match self {
            ApiError::Rewards(rewards_core::Error::InsufficientFunds { .. }) => "insufficient_funds",
            ApiError::Rewards(err) => match err.kind() {
                ErrorKind::Validation => "validation_error",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Conflict => "conflict",
                ErrorKind::Unauthorized => "unauthorized",
                ErrorKind::Transient => "service_unavailable",
                ErrorKind::Internal => "internal_error",
            },
            ApiError::BadRequest(_) => "validation_error",
            ApiError::Metrics(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (rewards_core::Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (rewards_core::Error::not_found("team", "t1"), StatusCode::NOT_FOUND),
            (rewards_core::Error::Conflict("full".into()), StatusCode::CONFLICT),
            (rewards_core::Error::Unauthorized("no".into()), StatusCode::FORBIDDEN),
            (rewards_core::Error::Transient("retry".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                rewards_core::Error::InsufficientFunds {
                    balance: Decimal::ONE,
                    requested: Decimal::TEN,
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err = ApiError::from(rewards_core::Error::Config("secret path".into()));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
