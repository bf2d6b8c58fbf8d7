//! JSON actions and mutations

use axum::{body::Bytes, extract::State, response::{IntoResponse, Response}};
use serde_json::{Map, Value};

use super::{json_response, message_body, AppState};
use crate::battery::BatteryStatus;
use crate::error::{Error, Result};
use crate::settings::to_pretty_json;

/// Run the `GET *.json` action named by `path`.
pub(super) async fn run_action(state: &AppState, path: &str) -> Response {
    let result = match path {
        "/power_off.json" => power_off(state),
        "/get_all_settings.json" => state.settings.all_settings_json(),
        "/get_all_options.json" => state.settings.all_options_json(),
        "/get_mode_options.json" => mode_options(state).await,
        "/get_modes.json" => current_modes(state).await,
        "/get_battery.json" => battery(state).await,
        "/take_photo.json" => take_photo(state).await,
        _ => {
            tracing::debug!(path = %path, "Unknown action");
            Ok(message_body("method_not_found"))
        }
    };

    match result {
        Ok(body) => json_response(body),
        Err(e) => e.into_response(),
    }
}

fn power_off(state: &AppState) -> Result<String> {
    let Some((program, args)) = state.config.power_off_command.split_first() else {
        return Err(Error::validation("no power-off command configured"));
    };
    tracing::warn!(command = ?state.config.power_off_command, "Powering off");
    // detached; the response goes out while the host shuts down
    tokio::process::Command::new(program).args(args).spawn()?;
    Ok(message_body("Powering Off"))
}

async fn mode_options(state: &AppState) -> Result<String> {
    let camera = state.camera.clone();
    let values = tokio::task::spawn_blocking(move || camera.mode_values().clone()).await?;
    to_pretty_json(&values)
}

async fn current_modes(state: &AppState) -> Result<String> {
    let camera = state.camera.clone();
    let modes = tokio::task::spawn_blocking(move || camera.current_modes()).await?;
    to_pretty_json(&modes)
}

async fn battery(state: &AppState) -> Result<String> {
    let power = state.power.clone();
    let reading = tokio::task::spawn_blocking(move || power.read()).await??;
    to_pretty_json(&BatteryStatus::from(reading))
}

async fn take_photo(state: &AppState) -> Result<String> {
    let camera = state.camera.clone();
    let path = tokio::task::spawn_blocking(move || camera.request_capture()).await??;
    Ok(message_body(format!("File Captured {}", path.display())))
}

/// `POST /save_settings` with `{"group.property": value, ...}`
pub(super) async fn save_settings(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let data: Map<String, Value> = serde_json::from_slice(&body)?;

    let mut properties = Vec::with_capacity(data.len());
    for (key, value) in data {
        let (group, name) = key
            .split_once('.')
            .ok_or_else(|| Error::validation(format!("setting {key:?} is not group.property")))?;
        properties.push((group.to_string(), name.to_string(), value));
    }

    let settings = state.settings.clone();
    let count = properties.len();
    tokio::task::spawn_blocking(move || settings.set_properties(properties)).await??;
    tracing::info!(properties = count, "Settings saved");

    Ok(json_response(message_body("Save Successful")))
}

/// `POST /save_modes` with `{"awb_mode": "auto", ...}`
pub(super) async fn save_modes(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let modes: Map<String, Value> = serde_json::from_slice(&body)?;

    let camera = state.camera.clone();
    tokio::task::spawn_blocking(move || camera.apply_mode_settings(&modes)).await??;

    Ok(json_response(message_body("Save Successful")))
}
