//! HTTP surface
//!
//! - `GET /` redirects to the web UI
//! - `GET *.html|*.js|*.css|*.png` static assets
//! - `GET *.json` JSON actions
//! - `GET /stream.mjpg` live MJPEG
//! - `POST /save_settings`, `POST /save_modes`
//!
//! API calls never fail at the HTTP level for an unknown action: the answer is
//! a `method_not_found` message with status 200.

mod actions;
mod assets;
mod stream;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::battery::PowerMonitor;
use crate::camera::CameraSession;
use crate::config::AppConfig;
use crate::settings::SettingsStore;

pub use stream::build_chunk;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub settings: Arc<SettingsStore>,
    pub camera: Arc<CameraSession>,
    pub power: Arc<dyn PowerMonitor>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_redirect).fallback(dispatch))
        .route("/stream.mjpg", get(stream::mjpeg_handler).fallback(dispatch))
        .route("/save_settings", post(actions::save_settings).fallback(dispatch))
        .route("/save_modes", post(actions::save_modes).fallback(dispatch))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_redirect() -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/index.html")],
    )
        .into_response()
}

async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let path = uri.path();
    match method {
        Method::GET if path.ends_with(".json") => actions::run_action(&state, path).await,
        Method::GET => match assets::Asset::resolve(path) {
            Some(asset) => assets::serve(&state.config.www_dir, &asset).await,
            None => not_found(),
        },
        Method::POST => {
            tracing::debug!(path = %path, "Unknown POST action");
            json_response(message_body("method_not_found"))
        }
        _ => not_found(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}

/// `{"message": "<text>"}`, byte-compatible with the web UI.
pub fn message_body(message: impl Into<String>) -> String {
    format!("{{\"message\": {}}}", Value::String(message.into()))
}

fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
