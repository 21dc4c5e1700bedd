//! V4L2 webcam-style camera

use std::path::Path;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::camera::{Camera, ParamValue, Parameter};
use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::Roi;
use crate::error::{Error, Result};

const BUFFER_COUNT: u32 = 4;

/// Wire format negotiated with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Mjpeg,
    Yuyv,
}

impl WireFormat {
    fn fourcc(self) -> FourCC {
        match self {
            WireFormat::Mjpeg => FourCC::new(b"MJPG"),
            WireFormat::Yuyv => FourCC::new(b"YUYV"),
        }
    }
}

/// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
}

/// List capture devices offering MJPEG or YUYV
pub fn detect_devices() -> Vec<FoundDevice> {
    let mut found = Vec::new();
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if negotiate_format(&dev).is_some() {
            info!("Found capture device: {} - {}", path, caps.card);
            found.push(FoundDevice {
                path,
                card: caps.card,
            });
        }
    }
    found
}

fn negotiate_format(dev: &Device) -> Option<WireFormat> {
    let formats = dev.enum_formats().ok()?;
    // Prefer YUYV: its luma plane maps to Mono8 without decoding
    if formats.iter().any(|f| f.fourcc == WireFormat::Yuyv.fourcc()) {
        Some(WireFormat::Yuyv)
    } else if formats.iter().any(|f| f.fourcc == WireFormat::Mjpeg.fourcc()) {
        Some(WireFormat::Mjpeg)
    } else {
        None
    }
}

/// V4L2 device exposed as a camera.
///
/// YUYV streams are delivered as `Mono8` (luma), MJPEG streams are decoded to
/// `Rgb24`. V4L2 cannot crop, so an ROI change only resizes the stream and
/// the offsets are always reported as zero.
pub struct V4l2Camera {
    path: String,
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    wire: WireFormat,
    sensor: (u32, u32),
    roi: Roi,
    sequence: u64,
}

impl V4l2Camera {
    /// Open `path`, or the first suitable device when `path` is `None`
    pub fn open(path: Option<&str>, width: u32, height: u32) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_string(),
            None => detect_devices()
                .into_iter()
                .next()
                .map(|d| d.path)
                .ok_or_else(|| Error::Device("No suitable capture device found".into()))?,
        };
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(&path)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(Error::Device(format!("{path} doesn't support video capture")));
        }
        let wire = negotiate_format(&device)
            .ok_or_else(|| Error::Device(format!("{path} offers neither MJPEG nor YUYV")))?;

        let mut camera = Self {
            path,
            device: Box::new(device),
            stream: None,
            wire,
            sensor: (width, height),
            roi: Roi::full(width, height),
            sequence: 0,
        };
        camera.apply_format(width, height)?;
        Ok(camera)
    }

    fn apply_format(&mut self, width: u32, height: u32) -> Result<()> {
        let mut fmt = self.device.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = self.wire.fourcc();
        let fmt = self.device.set_format(&fmt)?;
        // The driver answers with the size it actually picked
        self.roi = Roi::full(fmt.width, fmt.height);
        debug!(path = %self.path, width = fmt.width, height = fmt.height, "Format applied");
        Ok(())
    }

    fn decode(&self, raw: &[u8]) -> Result<Frame> {
        let (width, height) = (self.roi.width, self.roi.height);
        match self.wire {
            WireFormat::Yuyv => {
                let luma: Vec<u8> = raw.iter().step_by(2).copied().collect();
                Frame::new(luma, self.sequence, width, height, PixelFormat::Mono8)
            }
            WireFormat::Mjpeg => {
                let mut decoder = jpeg_decoder::Decoder::new(raw);
                let pixels = decoder
                    .decode()
                    .map_err(|e| Error::Device(format!("MJPEG decode failed: {e}")))?;
                Frame::new(pixels, self.sequence, width, height, PixelFormat::Rgb24)
            }
        }
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.path
    }

    fn sensor_size(&self) -> (u32, u32) {
        self.sensor
    }

    fn roi(&self) -> Roi {
        self.roi
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn grab_frame(&mut self) -> Result<Option<Frame>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let raw = match stream.next() {
            Ok((buf, _meta)) => buf.to_vec(),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        self.sequence += 1;
        match self.decode(&raw) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                // Truncated USB transfers happen; treat as a missed frame
                warn!("Dropping undecodable frame: {}", e);
                Ok(None)
            }
        }
    }

    fn change_roi(&mut self, roi: Roi) -> Result<()> {
        let (sensor_width, sensor_height) = self.sensor;
        roi.validate(sensor_width, sensor_height)?;

        let restart = self.stream.take().is_some();
        let applied = self.apply_format(roi.width, roi.height);
        if let Err(e) = &applied {
            warn!(requested = ?roi, "Device refused ROI: {}", e);
        }
        resume_after(applied, restart, || self.set_acquisition_status(true))
    }

    fn change_parameter(&mut self, name: &str, _value: ParamValue) -> Result<()> {
        Err(Error::UnknownParameter(name.to_string()))
    }

    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    fn set_acquisition_status(&mut self, started: bool) -> Result<()> {
        if started && self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)?;
            self.stream = Some(stream);
            info!("Capture stream started with {} buffers", BUFFER_COUNT);
        } else if !started {
            self.stream = None;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        info!(path = %self.path, frames = self.sequence, "V4L2 camera closed");
        Ok(())
    }
}

/// Restart a paused stream whether or not the format change went through;
/// the format error wins over a restart error
fn resume_after(applied: Result<()>, restart: bool, resume: impl FnOnce() -> Result<()>) -> Result<()> {
    if restart {
        if let Err(e) = resume() {
            if applied.is_ok() {
                return Err(e);
            }
            warn!("Failed to restart stream after refused ROI: {}", e);
        }
    }
    applied
}
