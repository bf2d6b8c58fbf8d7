//! Camera session tests
//!
//! Streaming/capture transitions, guaranteed restoration after a failed
//! capture, and mode handling against a fake camera.


use std::sync::{Arc, Mutex};
use std::time::Duration;

use camera_test_utils::*;
use picam_server::camera::{CameraError, CameraSession, SessionState};
use picam_server::frame_buffer::FrameBuffer;
use picam_server::Error;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn session(dir: &TempDir) -> (Arc<CameraSession>, Arc<Mutex<FakeState>>) {
    let (camera, state) = FakeCamera::new();
    let session = CameraSession::new(
        Box::new(camera),
        FrameBuffer::new(),
        settings_in(dir.path()),
        dir.path().join("captures"),
    );
    (Arc::new(session), state)
}

fn modes(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn assert_display_streaming(session: &CameraSession, state: &Arc<Mutex<FakeState>>) {
    let state = state.lock().unwrap();
    assert_eq!(state.resolution, DISPLAY);
    assert_eq!(state.framerate, DISPLAY_FPS);
    assert!(state.is_recording());
    drop(state);
    assert_eq!(session.state(), SessionState::Streaming);
}

#[test]
fn test_ensure_streaming_applies_display_config_once() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    assert_eq!(session.state(), SessionState::Idle);

    session.ensure_streaming().unwrap();
    session.ensure_streaming().unwrap();

    assert_display_streaming(&session, &state);
    assert_eq!(state.lock().unwrap().recording_starts, 1);
}

#[test]
fn test_capture_uses_still_resolution_and_restores_streaming() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();

    let path = session.request_capture().unwrap();

    assert!(path.starts_with(dir.path().join("captures")));
    assert!(path.exists());
    assert_eq!(state.lock().unwrap().captures, vec![(path.clone(), STILL)]);
    assert_display_streaming(&session, &state);
    assert_eq!(state.lock().unwrap().recording_starts, 2);
}

#[test]
fn test_failed_capture_still_restores_streaming() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();
    state.lock().unwrap().fail_capture = true;

    let result = session.request_capture();

    match result {
        Err(Error::Capture { source, .. }) => {
            assert!(matches!(source, CameraError::Capture(_)));
        }
        other => panic!("expected capture error, got {other:?}"),
    }
    assert!(state.lock().unwrap().captures.is_empty());
    assert_display_streaming(&session, &state);
}

#[test]
fn test_capture_while_idle_ends_streaming() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);

    // stop while not recording is only a warning
    session.request_capture().unwrap();

    assert_display_streaming(&session, &state);
}

#[test]
fn test_captures_get_distinct_paths() {
    let dir = TempDir::new().unwrap();
    let (session, _state) = session(&dir);
    session.ensure_streaming().unwrap();

    let first = session.request_capture().unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let second = session.request_capture().unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_apply_modes_ignores_unknown_keys_and_restarts_pipeline() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();

    session
        .apply_mode_settings(&modes(json!({
            "awb_mode": "cloudy",
            "image_effect": "sepia",
            "iso": 800
        })))
        .unwrap();

    let current = session.current_modes();
    assert_eq!(current["awb_mode"], "cloudy");
    assert_eq!(current["image_effect"], "sepia");
    assert_eq!(current["exposure_mode"], "auto");
    assert_eq!(current.len(), 5);
    assert_eq!(state.lock().unwrap().recording_starts, 2);
    assert_display_streaming(&session, &state);
}

#[test]
fn test_invalid_mode_value_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();

    let result = session.apply_mode_settings(&modes(json!({
        "awb_mode": "daylight",
        "meter_mode": "matrix"
    })));

    assert!(matches!(
        result,
        Err(Error::Camera(CameraError::InvalidMode { .. }))
    ));
    assert_eq!(session.current_modes()["awb_mode"], "auto");
    assert_eq!(state.lock().unwrap().recording_starts, 1);
}

#[test]
fn test_mode_change_restarts_with_running_config_when_settings_are_bad() {
    let dir = TempDir::new().unwrap();
    let (camera, state) = FakeCamera::new();
    let settings = settings_in(dir.path());
    let session = CameraSession::new(
        Box::new(camera),
        FrameBuffer::new(),
        settings.clone(),
        dir.path().join("captures"),
    );
    session.ensure_streaming().unwrap();
    settings
        .set_property("display", "width", json!("wide"))
        .unwrap();

    session
        .apply_mode_settings(&modes(json!({"awb_mode": "cloudy"})))
        .unwrap();

    assert_eq!(session.current_modes()["awb_mode"], "cloudy");
    assert_eq!(state.lock().unwrap().recording_starts, 2);
    assert_display_streaming(&session, &state);
}

#[test]
fn test_dead_pipeline_is_restarted_on_next_attach() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();

    state.lock().unwrap().pipeline_died = true;
    assert_eq!(session.state(), SessionState::Idle);

    session.ensure_streaming().unwrap();
    assert_eq!(state.lock().unwrap().recording_starts, 2);
    assert_display_streaming(&session, &state);
}

#[test]
fn test_mode_change_on_dead_pipeline_leaves_it_for_next_attach() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();
    state.lock().unwrap().pipeline_died = true;

    session
        .apply_mode_settings(&modes(json!({"exposure_mode": "night"})))
        .unwrap();

    // nothing to resume; the next attach brings it back
    assert_eq!(session.state(), SessionState::Idle);
    session.ensure_streaming().unwrap();
    assert_eq!(session.current_modes()["exposure_mode"], "night");
    assert_display_streaming(&session, &state);
}

#[test]
fn test_only_unknown_modes_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();

    session
        .apply_mode_settings(&modes(json!({"shutter_speed": 100})))
        .unwrap();
    assert_eq!(state.lock().unwrap().recording_starts, 1);
}

#[test]
fn test_current_modes_reads_the_device_every_time() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);

    assert_eq!(session.current_modes()["drc_strength"], "off");
    state
        .lock()
        .unwrap()
        .modes
        .insert(picam_server::camera::ModeKind::DrcStrength, "on".into());
    assert_eq!(session.current_modes()["drc_strength"], "on");
}

#[test]
fn test_mode_values_are_queried_once() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);

    let first = session.mode_values().clone();
    let second = session.mode_values().clone();

    assert_eq!(first, second);
    assert_eq!(first["meter_mode"], vec!["average", "spot"]);
    assert_eq!(state.lock().unwrap().mode_value_queries, 5);
}

#[test]
fn test_shutdown_stops_recording() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();

    session.shutdown();

    assert_eq!(session.state(), SessionState::Idle);
    assert!(!state.lock().unwrap().is_recording());
}

#[tokio::test]
async fn test_frames_reach_subscribers_across_a_capture() {
    let dir = TempDir::new().unwrap();
    let (session, state) = session(&dir);
    session.ensure_streaming().unwrap();
    let mut subscriber = session.frames().subscribe();

    emit_frame(&state, b"before");
    let frame = tokio::time::timeout(Duration::from_secs(1), subscriber.wait_for_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.as_ref(), jpeg(b"before").as_slice());

    let capture = Arc::clone(&session);
    tokio::task::spawn_blocking(move || capture.request_capture())
        .await
        .unwrap()
        .unwrap();

    emit_frame(&state, b"after");
    let frame = tokio::time::timeout(Duration::from_secs(1), subscriber.wait_for_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.as_ref(), jpeg(b"after").as_slice());
}
