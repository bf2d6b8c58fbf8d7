//! Camera session controller
//!
//! Owns the one camera and serializes everything done to it. Live streaming
//! and still capture never overlap: a capture stops the encoder feed, switches
//! to the still resolution, and a [`CaptureScope`] puts the display
//! configuration back and restarts streaming on every way out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use serde_json::{Map, Value};

use super::{CameraDevice, CameraError, ModeKind};
use crate::error::{Error, Result};
use crate::frame_buffer::FrameBuffer;
use crate::settings::{DisplayConfig, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Capturing,
}

struct SessionInner {
    device: Box<dyn CameraDevice>,
    state: SessionState,
}

impl SessionInner {
    /// Configure the display mode and start feeding the frame buffer.
    fn start_streaming(
        &mut self,
        display: DisplayConfig,
        frames: &Arc<FrameBuffer>,
    ) -> std::result::Result<(), CameraError> {
        self.device.set_resolution(display.resolution)?;
        self.device.set_framerate(display.framerate)?;
        self.device.start_recording(frames.writer())?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Stop the encoder feed. Stopping an idle camera is only worth a warning.
    fn stop_streaming(&mut self) {
        match self.device.stop_recording() {
            Ok(()) => {}
            Err(CameraError::NotRecording) => {
                tracing::warn!(state = ?self.state, "Stop requested while camera was not recording");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to stop recording cleanly"),
        }
        self.state = SessionState::Idle;
    }

    /// The configuration the device is running with right now.
    fn running_config(&self) -> DisplayConfig {
        DisplayConfig {
            resolution: self.device.resolution(),
            framerate: self.device.framerate(),
        }
    }

    /// Drop back to idle when the pipeline died underneath a stream.
    fn reconcile(&mut self) {
        if self.state == SessionState::Streaming && !self.device.is_recording() {
            tracing::warn!("Camera pipeline stopped unexpectedly");
            self.stop_streaming();
        }
    }
}

/// Holds the camera in [`SessionState::Capturing`]; dropping it returns the
/// camera to streaming.
struct CaptureScope<'a> {
    inner: MutexGuard<'a, SessionInner>,
    display: DisplayConfig,
    frames: &'a Arc<FrameBuffer>,
}

impl<'a> CaptureScope<'a> {
    fn enter(
        mut inner: MutexGuard<'a, SessionInner>,
        display: DisplayConfig,
        frames: &'a Arc<FrameBuffer>,
    ) -> Self {
        inner.stop_streaming();
        inner.state = SessionState::Capturing;
        Self {
            inner,
            display,
            frames,
        }
    }

    fn device(&mut self) -> &mut dyn CameraDevice {
        self.inner.device.as_mut()
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        match self.inner.start_streaming(self.display, self.frames) {
            Ok(()) => {
                tracing::debug!(resolution = %self.display.resolution, "Streaming resumed after capture");
            }
            Err(e) => {
                // left idle so the next stream attach retries
                self.inner.state = SessionState::Idle;
                tracing::error!(error = %e, "Failed to resume streaming after capture");
            }
        }
    }
}

pub struct CameraSession {
    inner: Mutex<SessionInner>,
    frames: Arc<FrameBuffer>,
    settings: Arc<SettingsStore>,
    capture_dir: PathBuf,
    mode_values: OnceLock<BTreeMap<&'static str, Vec<String>>>,
}

impl CameraSession {
    pub fn new(
        device: Box<dyn CameraDevice>,
        frames: Arc<FrameBuffer>,
        settings: Arc<SettingsStore>,
        capture_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                device,
                state: SessionState::Idle,
            }),
            frames,
            settings,
            capture_dir: capture_dir.into(),
            mode_values: OnceLock::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // a panic mid-capture still ran CaptureScope::drop, so the state is usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        let mut inner = self.lock();
        inner.reconcile();
        inner.state
    }

    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    /// Idle -> Streaming. No-op when already streaming.
    pub fn ensure_streaming(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.reconcile();
        if inner.state == SessionState::Streaming {
            return Ok(());
        }

        let config = self.settings.display()?;
        inner.start_streaming(config, &self.frames)?;
        tracing::info!(
            resolution = %config.resolution,
            framerate = config.framerate,
            "Camera streaming"
        );
        Ok(())
    }

    /// Take a still photo at the configured still resolution and return where
    /// it was written. Streaming is restored whether or not the capture works.
    pub fn request_capture(&self) -> Result<PathBuf> {
        let display = self.settings.display()?;
        let still = self.settings.still_resolution()?;
        let path = capture_path(&self.capture_dir);

        let mut scope = CaptureScope::enter(self.lock(), display, &self.frames);
        scope
            .device()
            .set_resolution(still)
            .and_then(|()| scope.device().capture(&path))
            .map_err(|source| Error::Capture {
                path: path.clone(),
                source,
            })?;
        drop(scope);

        tracing::info!(path = %path.display(), resolution = %still, "Photo captured");
        Ok(path)
    }

    /// Apply the recognised mode keys in `modes`; other keys are ignored.
    ///
    /// All values are checked against the legal set first, so an invalid
    /// value leaves every mode untouched.
    pub fn apply_mode_settings(&self, modes: &Map<String, Value>) -> Result<()> {
        let legal = self.mode_values();
        let mut changes = Vec::new();
        for (key, value) in modes {
            let Some(kind) = ModeKind::from_key(key) else {
                tracing::debug!(key = %key, "Ignoring unknown mode");
                continue;
            };
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let allowed = legal.get(kind.key()).is_some_and(|values| values.contains(&value));
            if !allowed {
                return Err(CameraError::InvalidMode { kind, value }.into());
            }
            changes.push((kind, value));
        }
        if changes.is_empty() {
            return Ok(());
        }

        let mut inner = self.lock();
        inner.reconcile();
        // controls are applied when the pipeline starts, so a live stream is
        // restarted with the configuration it was already running
        let resume = (inner.state == SessionState::Streaming).then(|| inner.running_config());
        if resume.is_some() {
            inner.stop_streaming();
        }
        let applied = changes
            .iter()
            .try_for_each(|(kind, value)| inner.device.set_mode(*kind, value));
        if let Some(config) = resume {
            if let Err(e) = inner.start_streaming(config, &self.frames) {
                // left idle so the next stream attach retries
                tracing::error!(error = %e, "Failed to resume streaming after mode change");
                applied?;
                return Err(e.into());
            }
        }
        applied?;

        tracing::info!(changes = ?changes, "Camera modes applied");
        Ok(())
    }

    /// Live mode values read from the device.
    pub fn current_modes(&self) -> BTreeMap<&'static str, String> {
        let inner = self.lock();
        ModeKind::ALL
            .into_iter()
            .map(|kind| (kind.key(), inner.device.mode(kind)))
            .collect()
    }

    /// Legal values per mode, queried from the device once.
    pub fn mode_values(&self) -> &BTreeMap<&'static str, Vec<String>> {
        self.mode_values.get_or_init(|| {
            let inner = self.lock();
            ModeKind::ALL
                .into_iter()
                .map(|kind| (kind.key(), inner.device.mode_values(kind)))
                .collect()
        })
    }

    /// Stop streaming for process exit.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::Idle {
            inner.stop_streaming();
            tracing::info!("Camera stopped");
        }
    }
}

/// `<dir>/<unix seconds>_<microseconds>.jpg`
fn capture_path(dir: &Path) -> PathBuf {
    let now = Utc::now();
    dir.join(format!(
        "{}_{:06}.jpg",
        now.timestamp(),
        now.timestamp_subsec_micros()
    ))
}
