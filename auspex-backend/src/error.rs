use auspex_state::TrackerError;
use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Tracker(TrackerError),
  NotFound(String),
  ValidationError(String),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Tracker(err) => {
        tracing::debug!(?err, "Lookup failed");

        let (status, message) = match err {
          TrackerError::UnknownWorld(_) => (StatusCode::NOT_FOUND, "World not found"),
          TrackerError::PlatformNotTracked(_) => {
            (StatusCode::NOT_FOUND, "Platform is not tracked")
          }
        };

        let error_response = ErrorResponse::with_details(message, err.to_string());
        (status, Json(error_response)).into_response()
      }
      AppError::NotFound(msg) => {
        let error_response = ErrorResponse::new(msg);
        (StatusCode::NOT_FOUND, Json(error_response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
    }
  }
}

impl From<TrackerError> for AppError {
  fn from(err: TrackerError) -> Self {
    AppError::Tracker(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
