//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use services::ServiceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Allocation service error.
    Service(ServiceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => service_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Rejections carry their message; storage detail never reaches the client.
fn service_error_to_response(err: ServiceError) -> (StatusCode, String) {
    if err.is_rejection() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else if err.is_conflict() {
        tracing::warn!(error = %err, "conflict persisted after retries");
        (
            StatusCode::CONFLICT,
            "Concurrent update conflict, please retry".to_string(),
        )
    } else {
        tracing::error!(error = %err, "allocation service failure");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Sku;
    use store::StoreError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::InvalidSku(Sku::new("X")), StatusCode::BAD_REQUEST),
            (ServiceError::OutOfStock(Sku::new("X")), StatusCode::BAD_REQUEST),
            (ServiceError::InvalidBatch, StatusCode::BAD_REQUEST),
            (
                ServiceError::Store(StoreError::BatchReferenceTaken("b1".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Store(StoreError::DuplicateProduct(Sku::new("X"))),
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::Store(StoreError::CorruptRow("qty".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_message_is_generic() {
        let (status, message) =
            service_error_to_response(ServiceError::Store(StoreError::CorruptRow("qty".into())));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");
    }
}
