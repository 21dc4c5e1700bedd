//! Camera capability set consumed by the acquisition loop

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::{Frame, Roi};
use crate::error::Result;

/// Value of a device parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

/// Description of one adjustable device parameter, enough to build a widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
    /// Allowed values for enumerated parameters
    pub choices: Vec<String>,
    /// Inclusive numeric range, if bounded
    pub range: Option<(f64, f64)>,
}

/// A camera backend.
///
/// Implementations are owned by exactly one acquisition thread; every call
/// arrives on that thread.
pub trait Camera: Send {
    fn name(&self) -> &str;

    /// Full sensor size in pixels `(width, height)`
    fn sensor_size(&self) -> (u32, u32);

    /// ROI currently read out, as reported by the device
    fn roi(&self) -> Roi;

    /// Newest frame, or `None` when the device has nothing to deliver yet.
    /// A transient no-data condition must not be an error.
    fn grab_frame(&mut self) -> Result<Option<Frame>>;

    /// Best effort: the device may snap to the nearest supported window.
    fn change_roi(&mut self, roi: Roi) -> Result<()>;

    fn change_parameter(&mut self, name: &str, value: ParamValue) -> Result<()>;

    fn parameters(&self) -> Vec<Parameter>;

    fn set_acquisition_status(&mut self, started: bool) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
