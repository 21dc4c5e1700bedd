use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

/// Immutable camera frame.
///
/// Cloning is cheap: the pixel payload is reference counted and never
/// mutated after capture, so every buffer slot can own its own handle.
#[derive(Clone)]
pub struct Frame {
    /// Pixel data, row-major, little endian for 16-bit formats
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Rgb24 => 3,
        }
    }

    pub fn channels(self) -> u32 {
        match self {
            PixelFormat::Mono8 | PixelFormat::Mono16 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::Rgb24 => "Rgb24",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mono8" => Some(PixelFormat::Mono8),
            "mono16" => Some(PixelFormat::Mono16),
            "rgb24" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// Array shape of a frame: `(height, width, channels)`.
///
/// Mono frames are 2-D (`channels == 1`), RGB frames 3-D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            height,
            width,
            channels: format.channels(),
        }
    }
}

impl Frame {
    /// Build a frame, checking the payload length against the geometry
    pub fn new(
        data: impl Into<Bytes>,
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let data = data.into();
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(Error::FrameSize {
                len: data.len(),
                width,
                height,
                format: format.name(),
            });
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                format,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn shape(&self) -> FrameShape {
        FrameShape::new(self.meta.width, self.meta.height, self.meta.format)
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// 16-bit samples of a `Mono16` frame
    pub fn samples_u16(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_payload_of_wrong_length() {
        let err = Frame::new(vec![0u8; 10], 0, 4, 4, PixelFormat::Mono8).unwrap_err();
        assert!(matches!(err, Error::FrameSize { len: 10, .. }));
    }

    #[test]
    fn rgb_frames_are_three_dimensional() {
        let frame = Frame::new(vec![0u8; 4 * 2 * 3], 7, 4, 2, PixelFormat::Rgb24).unwrap();
        assert_eq!(
            frame.shape(),
            FrameShape {
                height: 2,
                width: 4,
                channels: 3
            }
        );
        assert_eq!(frame.sequence(), 7);
    }

    #[test]
    fn mono16_samples_are_little_endian() {
        let frame = Frame::new(vec![0x01, 0x02, 0xff, 0x00], 0, 2, 1, PixelFormat::Mono16).unwrap();
        assert_eq!(frame.samples_u16(), vec![0x0201, 0x00ff]);
    }
}
