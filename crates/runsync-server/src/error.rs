use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::hub::HubError;
use crate::runtime::RuntimeError;

/// Application error type that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Hub(HubError),
    Runtime(RuntimeError),
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        AppError::Hub(err)
    }
}

impl From<RuntimeError> for AppError {
    fn from(err: RuntimeError) -> Self {
        AppError::Runtime(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Hub(err @ HubError::Duplicate(_)) => (StatusCode::CONFLICT, err.to_string()),
            AppError::Hub(err @ HubError::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
            AppError::Hub(err @ HubError::Finished(_)) => (StatusCode::CONFLICT, err.to_string()),
            AppError::Runtime(err @ RuntimeError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            AppError::Runtime(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
