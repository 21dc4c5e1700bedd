//! Recording session request, per-camera record state and completion tracking

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capture::Roi;
use crate::error::{Error, Result};

/// How a session decides it is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Stop once `stack_size` frames were captured per camera
    FixedCount,
    /// Stop after `acquisition_time` seconds
    FixedDuration,
    /// Run until stopped explicitly
    Toggled,
}

/// Stack file flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Plain multi-page TIFF
    Plain,
    /// Multi-page TIFF with an ImageJ description
    #[serde(rename = "imagej")]
    ImageJ,
    /// OME-TIFF
    Ome,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Plain | FileFormat::ImageJ => "tif",
            FileFormat::Ome => "ome.tif",
        }
    }
}

impl FromStr for FileFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "tiff" | "tif" => Ok(FileFormat::Plain),
            "imagej" => Ok(FileFormat::ImageJ),
            "ome" | "ome-tiff" => Ok(FileFormat::Ome),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Start-recording request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub camera_keys: Vec<String>,
    pub folder: PathBuf,
    pub filename: String,
    pub file_format: FileFormat,
    pub record_type: RecordType,
    /// Frames per camera for `FixedCount`
    #[serde(default)]
    pub stack_size: usize,
    /// Seconds for `FixedDuration`
    #[serde(default)]
    pub acquisition_time: f64,
}

impl SessionRequest {
    /// Policy-specific sanity checks, independent of the registered cameras
    pub fn validate(&self) -> Result<()> {
        if self.camera_keys.is_empty() {
            return Err(Error::InvalidSession("no cameras selected".into()));
        }
        if self.filename.trim().is_empty() {
            return Err(Error::InvalidSession("empty filename".into()));
        }
        match self.record_type {
            RecordType::FixedCount if self.stack_size == 0 => {
                Err(Error::InvalidSession("stack size must be positive".into()))
            }
            RecordType::FixedDuration
                if !(self.acquisition_time > 0.0
                    && Duration::try_from_secs_f64(self.acquisition_time).is_ok()) =>
            {
                Err(Error::InvalidSession(format!(
                    "acquisition time {} s is not a usable duration",
                    self.acquisition_time
                )))
            }
            _ => Ok(()),
        }
    }

    /// `<folder>/<key>_<filename>[_<suffix>].<ext>` with the key sanitized
    pub fn output_path(&self, key: &str, suffix: Option<&str>) -> PathBuf {
        output_path(&self.folder, key, &self.filename, suffix, self.file_format)
    }
}

pub fn output_path(
    folder: &Path,
    key: &str,
    filename: &str,
    suffix: Option<&str>,
    format: FileFormat,
) -> PathBuf {
    let mut name = format!("{}_{}", sanitize_key(key), filename);
    if let Some(suffix) = suffix {
        name.push('_');
        name.push_str(suffix);
    }
    folder.join(format!("{}.{}", name, format.extension()))
}

/// Replace anything but ASCII alphanumerics, `-` and `_`
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-camera recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordState {
    Idle = 0,
    Armed = 1,
    Recording = 2,
    Draining = 3,
}

impl RecordState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => RecordState::Armed,
            2 => RecordState::Recording,
            3 => RecordState::Draining,
            _ => RecordState::Idle,
        }
    }
}

/// Events for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Every participating camera finished writing
    RecordingFinished { files: Vec<PathBuf> },
    CameraDeleted { key: String },
    RoiChanged { key: String, roi: Roi },
}

/// Counts outstanding writers per camera and announces the end of a session
pub(crate) struct SessionTracker {
    inner: Mutex<TrackerInner>,
    events: flume::Sender<Notification>,
}

struct TrackerInner {
    pending: HashMap<String, usize>,
    files: Vec<PathBuf>,
    finished: bool,
}

impl SessionTracker {
    pub(crate) fn new(pending: HashMap<String, usize>, events: flume::Sender<Notification>) -> Self {
        let tracker = Self {
            inner: Mutex::new(TrackerInner {
                pending,
                files: Vec::new(),
                finished: false,
            }),
            events,
        };
        tracker.check(&mut tracker.lock());
        tracker
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one closed writer. Returns true when the camera has no writer left.
    pub(crate) fn writer_finished(&self, key: &str, file: PathBuf) -> bool {
        let mut inner = self.lock();
        let Some(count) = inner.pending.get_mut(key) else {
            // Camera was deleted mid-session
            return false;
        };
        *count = count.saturating_sub(1);
        let camera_done = *count == 0;
        if camera_done {
            inner.pending.remove(key);
        }
        inner.files.push(file);
        self.check(&mut inner);
        camera_done
    }

    /// Stop expecting writers of a deleted camera
    pub(crate) fn remove_camera(&self, key: &str) {
        let mut inner = self.lock();
        if inner.pending.remove(key).is_some() {
            self.check(&mut inner);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub(crate) fn pending_cameras(&self) -> usize {
        self.lock().pending.len()
    }

    fn check(&self, inner: &mut TrackerInner) {
        if inner.finished || !inner.pending.is_empty() {
            return;
        }
        inner.finished = true;
        let files = std::mem::take(&mut inner.files);
        info!(files = files.len(), "Recording finished");
        // The receiver lives in the coordinator; nobody listening is fine
        let _ = self.events.send(Notification::RecordingFinished { files });
    }
}
