//! Camera hardware abstraction
//!
//! [`CameraDevice`] is the raw device: it is not safe to drive from more than
//! one place at a time, so the server only ever touches it through
//! [`session::CameraSession`].

pub mod gst;
pub mod session;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::frame_buffer::FrameWriter;

pub use gst::GstCamera;
pub use session::{CameraSession, SessionState};

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera is not recording")]
    NotRecording,

    #[error("camera is already recording")]
    AlreadyRecording,

    #[error("invalid value {value:?} for {kind}")]
    InvalidMode { kind: ModeKind, value: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Camera capture parameter with a fixed set of legal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModeKind {
    WhiteBalance,
    Exposure,
    Meter,
    Effect,
    DrcStrength,
}

impl ModeKind {
    pub const ALL: [ModeKind; 5] = [
        ModeKind::WhiteBalance,
        ModeKind::Exposure,
        ModeKind::Meter,
        ModeKind::Effect,
        ModeKind::DrcStrength,
    ];

    /// Key used in the JSON mode endpoints.
    pub fn key(self) -> &'static str {
        match self {
            ModeKind::WhiteBalance => "awb_mode",
            ModeKind::Exposure => "exposure_mode",
            ModeKind::Meter => "meter_mode",
            ModeKind::Effect => "image_effect",
            ModeKind::DrcStrength => "drc_strength",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single physical camera.
///
/// Implementations may block; callers on an async runtime should go through
/// `spawn_blocking`.
pub trait CameraDevice: Send {
    /// Start feeding encoded MJPEG into `output`.
    fn start_recording(&mut self, output: FrameWriter) -> Result<(), CameraError>;

    /// Stop the encoder feed. Fails with [`CameraError::NotRecording`] when
    /// nothing is running.
    fn stop_recording(&mut self) -> Result<(), CameraError>;

    fn is_recording(&self) -> bool;

    fn resolution(&self) -> Resolution;

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), CameraError>;

    fn framerate(&self) -> u32;

    fn set_framerate(&mut self, framerate: u32) -> Result<(), CameraError>;

    /// Write one JPEG at the current resolution to `path`.
    fn capture(&mut self, path: &Path) -> Result<(), CameraError>;

    fn mode(&self, kind: ModeKind) -> String;

    fn set_mode(&mut self, kind: ModeKind, value: &str) -> Result<(), CameraError>;

    /// Legal values for `kind` as reported by the device.
    fn mode_values(&self, kind: ModeKind) -> Vec<String>;
}
