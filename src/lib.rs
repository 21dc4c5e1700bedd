pub mod capture;
pub mod error;
pub mod pipeline;
pub mod recording;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::capture::{Camera, CameraSpec, Frame, PixelFormat, Roi};
pub use crate::error::{Error, Result};
pub use crate::recording::{
    Coordinator, FileFormat, Notification, RecordState, RecordType, SessionRequest,
};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub recording: RecordingConfig,
    pub preview: PreviewConfig,
    pub cameras: Vec<CameraSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub live_buffer_size: usize,
    pub processing_buffer_size: usize,
    /// Pause after the device reported no frame
    pub idle_backoff_ms: u64,
    /// Pause after a capture error
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Frames per camera for fixed-count sessions
    pub stack_size: usize,
    /// Frame rate used to size fixed-duration buffers
    pub assumed_fps: f64,
    pub writer_poll_ms: u64,
    pub output_folder: PathBuf,
    pub filename: String,
    pub file_format: FileFormat,
    pub record_type: RecordType,
    /// Seconds, for fixed-duration sessions
    pub acquisition_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            live_buffer_size: 8,
            processing_buffer_size: 16,
            idle_backoff_ms: 1,
            error_backoff_ms: 10,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            stack_size: 100,
            assumed_fps: 30.0,
            writer_poll_ms: 2,
            output_folder: PathBuf::from("."),
            filename: "stack".into(),
            file_format: FileFormat::Plain,
            record_type: RecordType::FixedCount,
            acquisition_time: 1.0,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            // ~30 Hz refresh
            poll_interval_ms: 33,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            recording: RecordingConfig::default(),
            preview: PreviewConfig::default(),
            cameras: vec![CameraSpec::simulated("sim0")],
        }
    }
}

impl Config {
    /// Load from an optional TOML file, overridden by `LIVESTACK__*` variables
    /// (e.g. `LIVESTACK__RECORDING__STACK_SIZE=50`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("LIVESTACK").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Session request for the configured cameras and recording defaults
    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            camera_keys: self.cameras.iter().map(|c| c.key.clone()).collect(),
            folder: self.recording.output_folder.clone(),
            filename: self.recording.filename.clone(),
            file_format: self.recording.file_format,
            record_type: self.recording.record_type,
            stack_size: self.recording.stack_size,
            acquisition_time: self.recording.acquisition_time,
        }
    }
}
