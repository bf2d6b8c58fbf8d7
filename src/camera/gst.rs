//! GStreamer V4L2 camera
//!
//! Live view runs `v4l2src ! capsfilter ! appsink`; the appsink callback is the
//! encoder callback that feeds the [`FrameWriter`]. Still capture runs a
//! separate one-shot `v4l2src ! capsfilter ! filesink` pipeline, so the live
//! pipeline has to be stopped first to release the device.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer::{Caps, Fraction};
use gstreamer_app::{AppSink, AppSinkCallbacks};

use super::{CameraDevice, CameraError, ModeKind, Resolution};
use crate::frame_buffer::FrameWriter;

const CAPTURE_TIMEOUT_SECS: u64 = 10;

/// Menu values of the V4L2 controls behind each mode.
const WHITE_BALANCE: &[(&str, i32)] = &[
    ("off", 0),
    ("auto", 1),
    ("incandescent", 2),
    ("fluorescent", 3),
    ("fluorescent_h", 4),
    ("horizon", 5),
    ("daylight", 6),
    ("flash", 7),
    ("cloudy", 8),
    ("shade", 9),
];

const EXPOSURE: &[(&str, i32)] = &[
    ("auto", 0),
    ("backlight", 1),
    ("beach_snow", 2),
    ("candle_light", 3),
    ("dusk_dawn", 4),
    ("fall_colors", 5),
    ("fireworks", 6),
    ("landscape", 7),
    ("night", 8),
    ("party_indoor", 9),
    ("portrait", 10),
    ("sports", 11),
    ("sunset", 12),
    ("text", 13),
];

const METER: &[(&str, i32)] = &[
    ("average", 0),
    ("center_weighted", 1),
    ("spot", 2),
    ("matrix", 3),
];

const EFFECT: &[(&str, i32)] = &[
    ("none", 0),
    ("bw", 1),
    ("sepia", 2),
    ("negative", 3),
    ("emboss", 4),
    ("sketch", 5),
    ("sky_blue", 6),
    ("grass_green", 7),
    ("skin_whiten", 8),
    ("vivid", 9),
    ("aqua", 10),
    ("art_freeze", 11),
    ("silhouette", 12),
    ("solarization", 13),
    ("antique", 14),
];

const DRC: &[(&str, i32)] = &[("off", 0), ("on", 1)];

fn control(kind: ModeKind) -> (&'static str, &'static [(&'static str, i32)]) {
    match kind {
        ModeKind::WhiteBalance => ("white_balance_auto_preset", WHITE_BALANCE),
        ModeKind::Exposure => ("scene_mode", EXPOSURE),
        ModeKind::Meter => ("exposure_metering_mode", METER),
        ModeKind::Effect => ("color_effects", EFFECT),
        ModeKind::DrcStrength => ("wide_dynamic_range", DRC),
    }
}

fn pipeline_err(err: impl Display) -> CameraError {
    CameraError::Pipeline(err.to_string())
}

struct Recording {
    pipeline: gst::Pipeline,
    writer: Arc<Mutex<FrameWriter>>,
    /// Set from the bus once the live pipeline posts an error or EOS.
    failed: Arc<AtomicBool>,
}

pub struct GstCamera {
    device: String,
    resolution: Resolution,
    framerate: u32,
    modes: HashMap<ModeKind, &'static str>,
    recording: Option<Recording>,
}

impl GstCamera {
    /// Initialise GStreamer and open nothing yet; the device is only claimed
    /// while a pipeline is running.
    pub fn new(device: impl Into<String>) -> Result<Self, CameraError> {
        gst::init().map_err(pipeline_err)?;

        let modes = ModeKind::ALL
            .into_iter()
            .map(|kind| {
                let default = match kind {
                    ModeKind::WhiteBalance => "auto",
                    ModeKind::Exposure => "auto",
                    ModeKind::Meter => "average",
                    ModeKind::Effect => "none",
                    ModeKind::DrcStrength => "off",
                };
                (kind, default)
            })
            .collect();

        Ok(Self {
            device: device.into(),
            resolution: Resolution::new(1280, 720),
            framerate: 30,
            modes,
            recording: None,
        })
    }

    fn source(&self) -> Result<gst::Element, CameraError> {
        let mut controls = gst::Structure::builder("controls");
        for kind in ModeKind::ALL {
            let (name, values) = control(kind);
            let current = self.modes.get(&kind).copied().unwrap_or_default();
            if let Some((_, value)) = values.iter().find(|(label, _)| *label == current) {
                controls = controls.field(name, *value);
            }
        }

        let source = gst::ElementFactory::make("v4l2src")
            .property("device", self.device.as_str())
            .build()
            .map_err(pipeline_err)?;
        source.set_property("extra-controls", controls.build());
        Ok(source)
    }

    fn capsfilter(&self, framerate: Option<u32>) -> Result<gst::Element, CameraError> {
        let mut caps = Caps::builder("image/jpeg")
            .field("width", self.resolution.width as i32)
            .field("height", self.resolution.height as i32);
        if let Some(fps) = framerate {
            caps = caps.field("framerate", Fraction::new(fps as i32, 1));
        }

        gst::ElementFactory::make("capsfilter")
            .property("caps", caps.build())
            .build()
            .map_err(pipeline_err)
    }

    fn drain_bus_errors(pipeline: &gst::Pipeline) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(bus) = pipeline.bus() {
            while let Some(msg) = bus.pop() {
                if let gst::MessageView::Error(err) = msg.view() {
                    errors.push(err.error().to_string());
                }
            }
        }
        errors
    }

    /// Watch the live pipeline's bus from the streaming thread. Errors and EOS
    /// raised after the state change returned mark the recording dead.
    fn watch_bus(&self, pipeline: &gst::Pipeline) -> Result<Arc<AtomicBool>, CameraError> {
        let bus = pipeline
            .bus()
            .ok_or_else(|| CameraError::Pipeline("pipeline has no bus".into()))?;
        let failed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed);
        let device = self.device.clone();
        bus.set_sync_handler(move |_, msg| {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    tracing::error!(device = %device, "GStreamer error: {}", err.error());
                    flag.store(true, Ordering::Release);
                }
                gst::MessageView::Eos(_) => {
                    tracing::warn!(device = %device, "Camera pipeline reached end of stream");
                    flag.store(true, Ordering::Release);
                }
                _ => {}
            }
            gst::BusSyncReply::Drop
        });
        Ok(failed)
    }

    fn run_until_eos(pipeline: &gst::Pipeline) -> Result<(), CameraError> {
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| CameraError::Capture(Self::drain_bus_errors(pipeline).join("; ")))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| CameraError::Capture("pipeline has no bus".into()))?;
        match bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(CAPTURE_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Error(err) => Err(CameraError::Capture(err.error().to_string())),
                _ => Ok(()),
            },
            None => Err(CameraError::Capture(format!(
                "no frame within {CAPTURE_TIMEOUT_SECS}s"
            ))),
        }
    }
}

impl CameraDevice for GstCamera {
    fn start_recording(&mut self, output: FrameWriter) -> Result<(), CameraError> {
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }

        let source = self.source()?;
        let capsfilter = self.capsfilter(Some(self.framerate))?;
        let appsink = gst::ElementFactory::make("appsink")
            .build()
            .map_err(pipeline_err)?
            .dynamic_cast::<AppSink>()
            .map_err(|_| CameraError::Pipeline("appsink has unexpected type".into()))?;
        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);

        let writer = Arc::new(Mutex::new(output));
        let callback_writer = Arc::clone(&writer);
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    callback_writer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .write(map.as_slice());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([&source, &capsfilter, appsink.upcast_ref::<gst::Element>()])
            .map_err(pipeline_err)?;
        gst::Element::link_many([&source, &capsfilter, appsink.upcast_ref::<gst::Element>()])
            .map_err(pipeline_err)?;

        let failed = self.watch_bus(&pipeline)?;
        // bus errors were already logged by the watch
        if pipeline.set_state(gst::State::Playing).is_err() || failed.load(Ordering::Acquire) {
            pipeline.set_state(gst::State::Null).ok();
            return Err(CameraError::Pipeline(format!(
                "failed to start {}",
                self.device
            )));
        }

        tracing::info!(
            device = %self.device,
            resolution = %self.resolution,
            framerate = self.framerate,
            "Camera pipeline started"
        );
        self.recording = Some(Recording {
            pipeline,
            writer,
            failed,
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CameraError> {
        let recording = self.recording.take().ok_or(CameraError::NotRecording)?;
        recording
            .pipeline
            .set_state(gst::State::Null)
            .map_err(pipeline_err)?;
        recording
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish();
        tracing::info!(device = %self.device, "Camera pipeline stopped");
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
            .as_ref()
            .is_some_and(|recording| !recording.failed.load(Ordering::Acquire))
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), CameraError> {
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }
        self.resolution = resolution;
        Ok(())
    }

    fn framerate(&self) -> u32 {
        self.framerate
    }

    fn set_framerate(&mut self, framerate: u32) -> Result<(), CameraError> {
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }
        self.framerate = framerate;
        Ok(())
    }

    fn capture(&mut self, path: &Path) -> Result<(), CameraError> {
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let source = self.source()?;
        source.set_property("num-buffers", 1i32);
        let capsfilter = self.capsfilter(None)?;
        let sink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().as_ref())
            .build()
            .map_err(pipeline_err)?;

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([&source, &capsfilter, &sink])
            .map_err(pipeline_err)?;
        gst::Element::link_many([&source, &capsfilter, &sink]).map_err(pipeline_err)?;

        let result = Self::run_until_eos(&pipeline);

        pipeline.set_state(gst::State::Null).ok();
        if result.is_ok() {
            tracing::info!(path = %path.display(), resolution = %self.resolution, "Image captured");
        }
        result
    }

    /// V4L2 menu controls are only written through `extra-controls` when a
    /// pipeline starts, so this is the value the device was last given.
    fn mode(&self, kind: ModeKind) -> String {
        self.modes.get(&kind).copied().unwrap_or_default().to_string()
    }

    fn set_mode(&mut self, kind: ModeKind, value: &str) -> Result<(), CameraError> {
        let (_, values) = control(kind);
        let (label, _) = values
            .iter()
            .find(|(label, _)| *label == value)
            .ok_or_else(|| CameraError::InvalidMode {
                kind,
                value: value.to_string(),
            })?;
        self.modes.insert(kind, *label);
        Ok(())
    }

    fn mode_values(&self, kind: ModeKind) -> Vec<String> {
        let (_, values) = control(kind);
        values.iter().map(|(label, _)| label.to_string()).collect()
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        if let Some(recording) = self.recording.take() {
            recording.pipeline.set_state(gst::State::Null).ok();
        }
    }
}
