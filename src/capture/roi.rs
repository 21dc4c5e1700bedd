//! Region of interest on a camera sensor

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rectangular sub-window of the sensor being read out.
///
/// The step fields record the device's increment granularity and are only
/// hints for whoever builds a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "one")]
    pub step_x: u32,
    #[serde(default = "one")]
    pub step_y: u32,
    #[serde(default = "one")]
    pub step_width: u32,
    #[serde(default = "one")]
    pub step_height: u32,
}

fn one() -> u32 {
    1
}

impl Roi {
    pub fn new(offset_x: u32, offset_y: u32, width: u32, height: u32) -> Self {
        Self {
            offset_x,
            offset_y,
            width,
            height,
            step_x: 1,
            step_y: 1,
            step_width: 1,
            step_height: 1,
        }
    }

    /// Full-sensor ROI
    pub fn full(sensor_width: u32, sensor_height: u32) -> Self {
        Self::new(0, 0, sensor_width, sensor_height)
    }

    pub fn with_steps(mut self, step_x: u32, step_y: u32, step_width: u32, step_height: u32) -> Self {
        self.step_x = step_x.max(1);
        self.step_y = step_y.max(1);
        self.step_width = step_width.max(1);
        self.step_height = step_height.max(1);
        self
    }

    /// Check `offset + size <= sensor` on both axes and a non-empty window
    pub fn validate(&self, sensor_width: u32, sensor_height: u32) -> Result<()> {
        let fits_x = u64::from(self.offset_x) + u64::from(self.width) <= u64::from(sensor_width);
        let fits_y = u64::from(self.offset_y) + u64::from(self.height) <= u64::from(sensor_height);
        if self.width == 0 || self.height == 0 || !fits_x || !fits_y {
            return Err(Error::InvalidRoi {
                roi: *self,
                sensor_width,
                sensor_height,
            });
        }
        Ok(())
    }

    /// Whether this ROI ends no further right and no further down than `other`
    pub fn contained_in(&self, other: &Roi) -> bool {
        let far = |offset: u32, size: u32| u64::from(offset) + u64::from(size);
        far(self.offset_x, self.width) <= far(other.offset_x, other.width)
            && far(self.offset_y, self.height) <= far(other.offset_y, other.height)
    }

    /// Snap offsets and sizes down to this ROI's step granularity
    pub fn snapped(&self) -> Roi {
        let down = |value: u32, step: u32| value - value % step.max(1);
        Roi {
            offset_x: down(self.offset_x, self.step_x),
            offset_y: down(self.offset_y, self.step_y),
            width: down(self.width, self.step_width).max(self.step_width),
            height: down(self.height, self.step_height).max(self.step_height),
            ..*self
        }
    }
}
