//! JSON error envelope shared by every handler.
//!
//! Failures render as `{"error": {"code", "message", "details"}}`. The code
//! alone decides the HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::BookingError;
use crate::payments::PaymentError;
use crate::storage::StorageError;

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    InternalError,
    DatabaseError,
    /// Payment gateway, object storage or SMTP refused or timed out
    ExternalServiceError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError | Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError | Self::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalServiceError => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::TooManyRequests => "too_many_requests",
            Self::InternalError => "internal_error",
            Self::DatabaseError => "database_error",
            Self::ExternalServiceError => "external_service_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Extra payload next to the message
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Messages per offending request field
    Fields(HashMap<String, Vec<String>>),
    /// Free-form context such as the clashing appointment time
    Context(HashMap<String, serde_json::Value>),
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<ErrorDetails>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Missing, expired or revoked credentials
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Signed in, but the role does not allow it
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// One message per field; a lone message doubles as the summary.
    pub fn validation(fields: HashMap<String, Vec<String>>) -> Self {
        let summary = match fields.len() {
            1 => fields
                .values()
                .flat_map(|messages| messages.first())
                .next()
                .cloned()
                .unwrap_or_else(|| "Invalid input".to_string()),
            n => format!("{} fields are invalid", n),
        };
        Self::new(ErrorCode::ValidationError, summary).with_details(ErrorDetails::Fields(fields))
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(HashMap::from([(field.to_string(), vec![message.into()])]))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalServiceError, message)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status_code()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code.as_str(),
                message: self.message,
                details: self.details,
            },
        };
        (status, Json(envelope)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "Database error");

        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("Record not found"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    ApiError::conflict("A record with this value already exists")
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    ApiError::bad_request("Referenced record does not exist")
                } else {
                    ApiError::database("The database rejected the request")
                }
            }
            _ => ApiError::database("The database is unavailable"),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Backend(detail) => {
                tracing::error!(error = %detail, "Object storage error");
                ApiError::external_service("Failed to store the uploaded file")
            }
            other => ApiError::validation_field("image", other.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        tracing::error!(error = %err, "Payment gateway error");
        ApiError::external_service("Payment verification is unavailable, please retry")
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::InvalidDate | BookingError::InPast => ApiError::validation_field("date", err.to_string()),
            BookingError::InvalidTime => ApiError::validation_field("time", err.to_string()),
            BookingError::Conflict { existing_time } => {
                let error = ApiError::conflict(
                    "This time slot is not available. Appointments must be at least an hour apart",
                );
                match existing_time {
                    Some(time) => error.with_details(ErrorDetails::Context(HashMap::from([(
                        "conflicting_time".to_string(),
                        serde_json::Value::String(time),
                    )]))),
                    None => error,
                }
            }
            BookingError::Database(e) => e.into(),
        }
    }
}

/// Collects field errors across a request body before failing once
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    fields: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.fields.entry(field.into()).or_default().push(message.into());
        self
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_follows_code() {
        assert_eq!(ApiError::validation_field("name", "x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::rate_limited("x").status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::database("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::external_service("x").status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = ApiError::not_found("Order not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "Order not found");
        assert!(body["error"].get("details").is_none());
    }

    #[test]
    fn test_single_field_message_is_the_summary() {
        let err = ApiError::validation_field("name", "Name is required");
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(err.message, "Name is required");
    }

    #[test]
    fn test_builder_groups_messages_per_field() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("name", "Name is required");
        builder.add("email", "Invalid email format");
        builder.add("name", "Name is too short");

        let err = builder.finish().unwrap_err();
        assert_eq!(err.message, "2 fields are invalid");
        match &err.details {
            Some(ErrorDetails::Fields(fields)) => {
                assert_eq!(fields["name"].len(), 2);
                assert_eq!(fields["email"].len(), 1);
            }
            other => panic!("unexpected details: {:?}", other),
        }

        assert!(ValidationErrorBuilder::new().finish().is_ok());
    }

    #[test]
    fn test_booking_conflict_carries_time() {
        let err: ApiError = BookingError::Conflict {
            existing_time: Some("10:00".to_string()),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        match &err.details {
            Some(ErrorDetails::Context(details)) => assert_eq!(details["conflicting_time"], "10:00"),
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_storage_and_payment_mapping() {
        let err: ApiError = StorageError::InvalidDataUrl.into();
        assert_eq!(err.code, ErrorCode::ValidationError);

        let err: ApiError = StorageError::Backend("disk full".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let err: ApiError = PaymentError::Unavailable("timeout".to_string()).into();
        assert_eq!(err.code, ErrorCode::ExternalServiceError);
    }
}
