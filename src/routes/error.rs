use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::settings::SettingsError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Database error: {0}")]
    Database(#[source] StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingTable => {
                ApiError::NotFound("water_readings table does not exist".to_string())
            }
            other => ApiError::Database(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, message, error_id) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            ApiError::Settings(e @ SettingsError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string(), None)
            }
            ApiError::Settings(e) => internal("Settings error", &e),
            ApiError::Database(e) => internal("Database error", &e),
        };

        let mut error = json!({
            "code": status.as_u16(),
            "message": message,
        });
        if let Some(error_id) = error_id {
            error["error_id"] = json!(error_id);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

fn internal(
    context: &str,
    err: &dyn std::error::Error,
) -> (StatusCode, String, Option<String>) {
    // ---
    let error_id = Uuid::new_v4();
    tracing::error!(error_id = ?error_id, "{}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
        Some(error_id.to_string()),
    )
}
