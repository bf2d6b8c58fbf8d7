//! Raspberry Pi camera web server
//!
//! Streams live MJPEG, takes still photos and exposes the camera settings over
//! HTTP. The encoder feeds a [`frame_buffer::FrameBuffer`] that every streaming
//! connection waits on; the camera itself is only driven through
//! [`camera::CameraSession`].

pub mod battery;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame_buffer;
pub mod settings;
pub mod web;

pub use config::AppConfig;
pub use error::{Error, Result};
