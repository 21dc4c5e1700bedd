//! Error type shared by the acquisition and recording pipeline

use std::path::PathBuf;

use crate::capture::Roi;

/// Errors surfaced by livestack operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("camera `{0}` is already registered")]
    DuplicateCamera(String),

    #[error("unknown camera adapter `{0}`")]
    UnknownAdapter(String),

    #[error("camera `{0}` stopped acquiring")]
    Disconnected(String),

    #[error("ROI {roi:?} does not fit the {sensor_width}x{sensor_height} sensor")]
    InvalidRoi {
        roi: Roi,
        sensor_width: u32,
        sensor_height: u32,
    },

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{name}` rejected: {reason}")]
    ParameterRejected { name: String, reason: String },

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("unsupported file format `{0}`")]
    UnsupportedFormat(String),

    #[error("invalid recording session: {0}")]
    InvalidSession(String),

    #[error("a recording session is already running")]
    SessionActive,

    #[error("frame of {len} bytes does not match {width}x{height} {format}")]
    FrameSize {
        len: usize,
        width: u32,
        height: u32,
        format: &'static str,
    },

    #[error("device error: {0}")]
    Device(String),

    #[error("sink `{path}` is closed")]
    SinkClosed { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn rejected(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParameterRejected {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
