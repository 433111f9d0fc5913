use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, IngestError, SearchError, StoreError};

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

/// `{"error": {...}}` body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        Self::Ingest(IngestError::InvalidPayload(err))
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Ingest(IngestError::Unauthorized) => StatusCode::UNAUTHORIZED,
            Self::Ingest(IngestError::InvalidPayload(_))
            | Self::Search(SearchError::EmptyQuery)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Ingest(IngestError::Overloaded | IngestError::ShuttingDown)
            | Self::Search(SearchError::EmbeddingUnavailable(_))
            | Self::Search(SearchError::Store(StoreError::Unavailable(_)))
            | Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Search(SearchError::Store(_)) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Ingest(IngestError::Unauthorized) => "UNAUTHORIZED",
            Self::Ingest(IngestError::InvalidPayload(_)) => "INVALID_PAYLOAD",
            Self::Ingest(IngestError::Overloaded) => "OVERLOADED",
            Self::Ingest(IngestError::ShuttingDown) => "SHUTTING_DOWN",
            Self::Search(SearchError::EmptyQuery) => "EMPTY_QUERY",
            Self::Search(SearchError::EmbeddingUnavailable(_)) => "EMBEDDING_UNAVAILABLE",
            Self::Search(SearchError::Store(StoreError::Unavailable(_)))
            | Self::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            Self::Search(SearchError::Store(_)) | Self::Store(_) => "STORE_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    /// Back-pressure rejections tell the sender when to come back.
    fn retry_after(&self) -> bool {
        matches!(
            self,
            Self::Ingest(IngestError::Overloaded | IngestError::ShuttingDown)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
