//! Per-camera frame filters applied before writing processed stacks

use std::fmt;

use once_cell::sync::Lazy;

use crate::capture::{Frame, PixelFormat};
use crate::error::{Error, Result};

/// A pure frame-to-frame transform
pub type FilterFn = fn(&Frame) -> Result<Frame>;

/// A named filter of the registration table
#[derive(Clone, Copy)]
pub struct Filter {
    pub name: &'static str,
    pub description: &'static str,
    apply: FilterFn,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

static FILTERS: Lazy<Vec<Filter>> = Lazy::new(|| {
    vec![
        Filter {
            name: "invert",
            description: "Invert intensities",
            apply: invert,
        },
        Filter {
            name: "flip_horizontal",
            description: "Mirror left to right",
            apply: flip_horizontal,
        },
        Filter {
            name: "flip_vertical",
            description: "Mirror top to bottom",
            apply: flip_vertical,
        },
    ]
});

/// Filters compiled into this build
pub fn filters() -> &'static [Filter] {
    &FILTERS
}

pub fn lookup(name: &str) -> Result<Filter> {
    FILTERS
        .iter()
        .find(|f| f.name == name)
        .copied()
        .ok_or_else(|| Error::UnknownFilter(name.to_string()))
}

/// Left-to-right composition of filters
#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    stages: Vec<Filter>,
}

impl FilterPipeline {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let stages = names
            .iter()
            .map(|name| lookup(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|f| f.name).collect()
    }

    pub fn apply(&self, frame: Frame) -> Result<Frame> {
        self.stages
            .iter()
            .try_fold(frame, |frame, stage| (stage.apply)(&frame))
    }
}

fn rebuild(frame: &Frame, data: Vec<u8>) -> Result<Frame> {
    let mut out = Frame::new(
        data,
        frame.meta.sequence,
        frame.meta.width,
        frame.meta.height,
        frame.meta.format,
    )?;
    out.timestamp = frame.timestamp;
    Ok(out)
}

fn invert(frame: &Frame) -> Result<Frame> {
    let data = match frame.meta.format {
        PixelFormat::Mono16 => frame
            .samples_u16()
            .into_iter()
            .flat_map(|v| (u16::MAX - v).to_le_bytes())
            .collect(),
        PixelFormat::Mono8 | PixelFormat::Rgb24 => frame.data.iter().map(|v| u8::MAX - v).collect(),
    };
    rebuild(frame, data)
}

fn flip_horizontal(frame: &Frame) -> Result<Frame> {
    let pixel = frame.meta.format.bytes_per_pixel();
    let row = frame.meta.width as usize * pixel;
    let mut data = Vec::with_capacity(frame.data.len());
    for line in frame.data.chunks_exact(row) {
        for px in line.chunks_exact(pixel).rev() {
            data.extend_from_slice(px);
        }
    }
    rebuild(frame, data)
}

fn flip_vertical(frame: &Frame) -> Result<Frame> {
    let row = frame.meta.width as usize * frame.meta.format.bytes_per_pixel();
    let data = frame
        .data
        .chunks_exact(row)
        .rev()
        .flatten()
        .copied()
        .collect();
    rebuild(frame, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Frame {
        // 3x2: rows [0 1 2] [3 4 5]
        Frame::new(vec![0u8, 1, 2, 3, 4, 5], 1, 3, 2, PixelFormat::Mono8).unwrap()
    }

    #[test]
    fn stages_apply_left_to_right() {
        let pipeline = FilterPipeline::from_names(&["flip_horizontal", "flip_vertical"]).unwrap();
        assert_eq!(pipeline.names(), vec!["flip_horizontal", "flip_vertical"]);
        let out = pipeline.apply(ramp()).unwrap();
        assert_eq!(&out.data[..], &[5, 4, 3, 2, 1, 0]);
        assert_eq!(out.sequence(), 1);
    }

    #[test]
    fn invert_handles_sixteen_bit() {
        let frame = Frame::new(vec![0x00, 0x00, 0xff, 0xff], 0, 2, 1, PixelFormat::Mono16).unwrap();
        let out = lookup("invert").unwrap();
        let out = (out.apply)(&frame).unwrap();
        assert_eq!(out.samples_u16(), vec![u16::MAX, 0]);
    }

    #[test]
    fn unknown_filter_names_fail() {
        assert!(matches!(
            FilterPipeline::from_names(&["invert", "sharpen"]),
            Err(Error::UnknownFilter(name)) if name == "sharpen"
        ));
        assert!(FilterPipeline::default().is_empty());
    }
}
