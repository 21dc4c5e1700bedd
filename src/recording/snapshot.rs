//! Single-frame export

use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use tracing::info;

use crate::capture::{Frame, PixelFormat};
use crate::error::{Error, Result};

fn size_error(frame: &Frame) -> Error {
    Error::FrameSize {
        len: frame.data.len(),
        width: frame.meta.width,
        height: frame.meta.height,
        format: frame.meta.format.name(),
    }
}

/// Save one frame; the image format follows the path's extension
pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let (width, height) = (frame.meta.width, frame.meta.height);
    match frame.meta.format {
        PixelFormat::Mono8 => GrayImage::from_raw(width, height, frame.data.to_vec())
            .ok_or_else(|| size_error(frame))?
            .save(path)?,
        PixelFormat::Mono16 => {
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, frame.samples_u16())
                .ok_or_else(|| size_error(frame))?
                .save(path)?
        }
        PixelFormat::Rgb24 => RgbImage::from_raw(width, height, frame.data.to_vec())
            .ok_or_else(|| size_error(frame))?
            .save(path)?,
    }
    info!(path = ?path, sequence = frame.meta.sequence, "Snapped frame");
    Ok(())
}
