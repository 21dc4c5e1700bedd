//! Table of camera adapters available to this build

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::capture::camera::Camera;
use crate::capture::frame::PixelFormat;
use crate::capture::simulated::{SimulatedCamera, SimulatedConfig};
use crate::error::{Error, Result};

/// Camera entry of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSpec {
    /// Key the camera is registered under
    pub key: String,
    /// Adapter name, see [`adapters`]
    pub kind: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_format")]
    pub format: PixelFormat,
    /// Device node for hardware adapters; auto-detected when absent
    #[serde(default)]
    pub device: Option<String>,
}

fn default_width() -> u32 {
    512
}
fn default_height() -> u32 {
    512
}
fn default_fps() -> f64 {
    30.0
}
fn default_format() -> PixelFormat {
    PixelFormat::Mono8
}

impl CameraSpec {
    pub fn simulated(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: "simulated".into(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            format: default_format(),
            device: None,
        }
    }
}

type OpenFn = fn(&CameraSpec) -> Result<Box<dyn Camera>>;

/// One registered adapter
pub struct Adapter {
    pub name: &'static str,
    pub description: &'static str,
    open: OpenFn,
}

static ADAPTERS: Lazy<Vec<Adapter>> = Lazy::new(|| {
    #[allow(unused_mut)]
    let mut table = vec![Adapter {
        name: "simulated",
        description: "Counter-filled frames at a fixed rate",
        open: open_simulated,
    }];
    #[cfg(feature = "v4l2")]
    table.push(Adapter {
        name: "v4l2",
        description: "Webcam-style V4L2 device",
        open: open_v4l2,
    });
    table
});

fn open_simulated(spec: &CameraSpec) -> Result<Box<dyn Camera>> {
    Ok(Box::new(SimulatedCamera::new(
        spec.key.clone(),
        SimulatedConfig {
            width: spec.width,
            height: spec.height,
            fps: spec.fps,
            format: spec.format,
            miss_every: 0,
        },
    )))
}

#[cfg(feature = "v4l2")]
fn open_v4l2(spec: &CameraSpec) -> Result<Box<dyn Camera>> {
    let camera = crate::capture::v4l2::V4l2Camera::open(spec.device.as_deref(), spec.width, spec.height)?;
    Ok(Box::new(camera))
}

/// Adapters compiled into this build
pub fn adapters() -> &'static [Adapter] {
    &ADAPTERS
}

/// Instantiate the adapter named by `spec.kind`
pub fn open(spec: &CameraSpec) -> Result<Box<dyn Camera>> {
    let adapter = ADAPTERS
        .iter()
        .find(|a| a.name == spec.kind)
        .ok_or_else(|| Error::UnknownAdapter(spec.kind.clone()))?;
    (adapter.open)(spec)
}
