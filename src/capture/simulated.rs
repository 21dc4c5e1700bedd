//! Simulated camera producing counter-filled frames at a fixed rate

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::camera::{Camera, ParamValue, Parameter};
use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::Roi;
use crate::error::{Error, Result};

const ROI_STEPS: (u32, u32, u32, u32) = (2, 2, 4, 2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    pub width: u32,
    pub height: u32,
    /// Frame rate; 0 delivers frames as fast as they are grabbed
    pub fps: f64,
    pub format: PixelFormat,
    /// Every n-th grab reports "no frame available" (0 disables)
    #[serde(default)]
    pub miss_every: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            fps: 30.0,
            format: PixelFormat::Mono8,
            miss_every: 0,
        }
    }
}

/// Camera whose frame `n` has every pixel set to `n`.
///
/// `grab_frame` blocks until the next frame is due, like a vendor SDK would.
pub struct SimulatedCamera {
    name: String,
    config: SimulatedConfig,
    roi: Roi,
    exposure_ms: f64,
    started: bool,
    closed: bool,
    sequence: u64,
    grabs: u64,
    next_due: Option<Instant>,
}

impl SimulatedCamera {
    pub fn new(name: impl Into<String>, config: SimulatedConfig) -> Self {
        let (sx, sy, sw, sh) = ROI_STEPS;
        let roi = Roi::full(config.width, config.height).with_steps(sx, sy, sw, sh);
        Self {
            name: name.into(),
            config,
            roi,
            exposure_ms: 10.0,
            started: false,
            closed: false,
            sequence: 0,
            grabs: 0,
            next_due: None,
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        if self.config.fps <= 0.0 {
            return None;
        }
        let period = 1.0 / self.config.fps;
        Some(Duration::from_secs_f64(period.max(self.exposure_ms / 1000.0)))
    }

    fn wait_for_next_frame(&mut self) {
        let Some(interval) = self.frame_interval() else {
            return;
        };
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Fell behind: restart the cadence instead of bursting
        let next = due + interval;
        self.next_due = Some(if next < now { now + interval } else { next });
    }

    fn render(&self) -> Result<Frame> {
        let width = self.roi.width;
        let height = self.roi.height;
        let pixels = width as usize * height as usize;
        let data = match self.config.format {
            PixelFormat::Mono8 => vec![self.sequence as u8; pixels],
            PixelFormat::Mono16 => (self.sequence as u16)
                .to_le_bytes()
                .repeat(pixels),
            PixelFormat::Rgb24 => vec![self.sequence as u8; pixels * 3],
        };
        Frame::new(data, self.sequence, width, height, self.config.format)
    }
}

impl Camera for SimulatedCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn sensor_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn roi(&self) -> Roi {
        self.roi
    }

    fn grab_frame(&mut self) -> Result<Option<Frame>> {
        if !self.started || self.closed {
            return Ok(None);
        }
        self.wait_for_next_frame();

        self.grabs += 1;
        if self.config.miss_every > 0 && self.grabs % self.config.miss_every == 0 {
            return Ok(None);
        }

        let frame = self.render()?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn change_roi(&mut self, roi: Roi) -> Result<()> {
        let (sensor_width, sensor_height) = self.sensor_size();
        roi.validate(sensor_width, sensor_height)?;

        let (sx, sy, sw, sh) = ROI_STEPS;
        self.roi = roi.with_steps(sx, sy, sw, sh).snapped();
        debug!(camera = %self.name, requested = ?roi, effective = ?self.roi, "ROI applied");
        Ok(())
    }

    fn change_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "exposure" => {
                let ms = value
                    .as_f64()
                    .filter(|ms| (0.01..=10_000.0).contains(ms))
                    .ok_or_else(|| Error::rejected(name, format!("{value} is not in 0.01..=10000 ms")))?;
                self.exposure_ms = ms;
            }
            "frame_rate" => {
                let fps = value
                    .as_f64()
                    .filter(|fps| (0.0..=1000.0).contains(fps))
                    .ok_or_else(|| Error::rejected(name, format!("{value} is not in 0..=1000 fps")))?;
                self.config.fps = fps;
                self.next_due = None;
            }
            "pixel_format" => {
                let format = value
                    .as_str()
                    .and_then(PixelFormat::parse)
                    .ok_or_else(|| Error::rejected(name, format!("unknown pixel format {value}")))?;
                self.config.format = format;
            }
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        debug!(camera = %self.name, %name, %value, "Parameter changed");
        Ok(())
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter {
                name: "exposure".into(),
                value: ParamValue::Float(self.exposure_ms),
                choices: Vec::new(),
                range: Some((0.01, 10_000.0)),
            },
            Parameter {
                name: "frame_rate".into(),
                value: ParamValue::Float(self.config.fps),
                choices: Vec::new(),
                range: Some((0.0, 1000.0)),
            },
            Parameter {
                name: "pixel_format".into(),
                value: ParamValue::Text(self.config.format.name().into()),
                choices: ["Mono8", "Mono16", "Rgb24"].map(String::from).to_vec(),
                range: None,
            },
        ]
    }

    fn set_acquisition_status(&mut self, started: bool) -> Result<()> {
        if self.closed {
            return Err(Error::Device(format!("{} is closed", self.name)));
        }
        self.started = started;
        self.next_due = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.started = false;
        self.closed = true;
        info!(camera = %self.name, frames = self.sequence, "Simulated camera closed");
        Ok(())
    }
}
