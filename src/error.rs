//! Error handling for the camera server

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::camera::CameraError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings or options file could not be used
    #[error("Settings error: {0}")]
    Settings(String),

    /// Request body or value rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Still capture failed; the camera has already been put back to streaming
    #[error("Capture to {} failed: {source}", .path.display())]
    Capture {
        path: PathBuf,
        #[source]
        source: CameraError,
    },

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    /// Power monitor could not be read
    #[error("Power monitor error: {0}")]
    Power(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Serialization(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
            Error::Capture { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CAPTURE_ERROR"),
            Error::Camera(CameraError::InvalidMode { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_MODE")
            }
            Error::Camera(_) => (StatusCode::SERVICE_UNAVAILABLE, "CAMERA_ERROR"),
            Error::Power(_) => (StatusCode::SERVICE_UNAVAILABLE, "POWER_MONITOR_ERROR"),
            Error::Settings(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SETTINGS_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
