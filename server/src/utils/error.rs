use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// One or more requested seats are held by another live ticket.
    #[error("Seats already taken: {}", .0.join(", "))]
    SeatConflict(Vec<String>),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::SeatConflict(_) => StatusCode::CONFLICT,
            AppError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Expired(_) => StatusCode::GONE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::SeatConflict(_) => "SEAT_CONFLICT",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Expired(_) => "EXPIRED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::SeatConflict(codes) => Some(json!({ "conflicts": codes })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            // Client-side rejections are expected traffic.
            other => {
                warn!(code = other.code(), message = %other, "Request rejected");
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SeatConflict(codes) => AppError::SeatConflict(codes),
            StoreError::VoucherRedeemed(code) => AppError::Conflict(format!(
                "Voucher {code} can only be used once per user"
            )),
            StoreError::StaleTicket(id) => AppError::Conflict(format!(
                "Ticket {id} was modified by another request, reload and retry"
            )),
            StoreError::PaymentNotRefundable(id) => AppError::InvalidState(format!(
                "Payment {id} is not in a refundable state"
            )),
            StoreError::IntentNotPending(id) => AppError::Conflict(format!(
                "Payment intent {id} is no longer pending"
            )),
            StoreError::ScheduleOverlap(id) => AppError::Conflict(format!(
                "Room is already booked by schedule {id} during that time"
            )),
            StoreError::Corrupt(msg) => AppError::InternalServerError(msg),
            StoreError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::InvalidState(msg)
            | AppError::Expired(msg) => msg.clone(),
            AppError::SeatConflict(_) => self.to_string(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_conflict_lists_codes() {
        let err = AppError::SeatConflict(vec!["A1".into(), "A2".into()]);
        assert_eq!(err.to_string(), "Seats already taken: A1, A2");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.details(), Some(json!({ "conflicts": ["A1", "A2"] })));
    }

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            AppError::from(StoreError::StaleTicket(id)).code(),
            "CONFLICT"
        );
        assert_eq!(
            AppError::from(StoreError::PaymentNotRefundable(id)).code(),
            "INVALID_STATE"
        );
        assert_eq!(
            AppError::from(StoreError::SeatConflict(vec!["B3".into()])).code(),
            "SEAT_CONFLICT"
        );
    }

    #[test]
    fn test_internal_errors_hide_message() {
        let response = AppError::InternalServerError("pool exhausted".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
