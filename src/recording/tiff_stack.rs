//! Multi-page TIFF stacks.
//!
//! One file per camera per session; every frame becomes one page. The
//! `imagej` and `ome` flavours only differ in the description written on the
//! first page.

use std::fs::File;
use std::path::{Path, PathBuf};

use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, info, warn};

use crate::capture::{Frame, PixelFormat};
use crate::error::{Error, Result};
use crate::recording::session::FileFormat;
use crate::recording::writer::{FrameSink, SinkFactory};

/// Opens [`TiffStackSink`]s for every [`FileFormat`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffSinkFactory;

impl SinkFactory for TiffSinkFactory {
    fn supports(&self, format: FileFormat) -> bool {
        matches!(format, FileFormat::Plain | FileFormat::ImageJ | FileFormat::Ome)
    }

    fn open(
        &self,
        path: &Path,
        format: FileFormat,
        expected_frames: Option<usize>,
    ) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(TiffStackSink::create(path, format, expected_frames)?))
    }
}

pub struct TiffStackSink {
    path: PathBuf,
    format: FileFormat,
    expected_frames: Option<usize>,
    encoder: Option<TiffEncoder<File>>,
    pages: usize,
}

impl TiffStackSink {
    pub fn create(path: &Path, format: FileFormat, expected_frames: Option<usize>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let encoder = TiffEncoder::new(file)?;
        debug!(path = ?path, ?format, "TIFF stack opened");

        Ok(Self {
            path: path.to_path_buf(),
            format,
            expected_frames,
            encoder: Some(encoder),
            pages: 0,
        })
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    fn description(&self, frame: &Frame) -> Option<String> {
        let meta = &frame.meta;
        match self.format {
            FileFormat::Plain => None,
            FileFormat::ImageJ => {
                let mut desc = String::from("ImageJ=1.11a\n");
                if let Some(n) = self.expected_frames {
                    desc.push_str(&format!("images={n}\nslices={n}\n"));
                }
                if meta.format == PixelFormat::Rgb24 {
                    desc.push_str("channels=3\n");
                }
                Some(desc)
            }
            FileFormat::Ome => {
                let pixel_type = match meta.format {
                    PixelFormat::Mono16 => "uint16",
                    PixelFormat::Mono8 | PixelFormat::Rgb24 => "uint8",
                };
                let name = self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Some(format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                     <OME xmlns=\"http://www.openmicroscopy.org/Schemas/OME/2016-06\">\
                     <Image ID=\"Image:0\" Name=\"{name}\">\
                     <Pixels ID=\"Pixels:0\" DimensionOrder=\"XYCZT\" Type=\"{pixel_type}\" \
                     SizeX=\"{}\" SizeY=\"{}\" SizeC=\"{}\" SizeZ=\"1\" SizeT=\"{}\"/>\
                     </Image></OME>",
                    meta.width,
                    meta.height,
                    meta.format.channels(),
                    self.expected_frames.unwrap_or(1),
                ))
            }
        }
    }
}

fn write_page<C>(
    encoder: &mut TiffEncoder<File>,
    width: u32,
    height: u32,
    data: &[C::Inner],
    description: Option<&str>,
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let mut image = encoder.new_image::<C>(width, height)?;
    if let Some(description) = description {
        image.encoder().write_tag(Tag::ImageDescription, description)?;
    }
    image.write_data(data)?;
    Ok(())
}

impl FrameSink for TiffStackSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let description = if self.pages == 0 {
            self.description(frame)
        } else {
            None
        };
        let encoder = self.encoder.as_mut().ok_or_else(|| Error::SinkClosed {
            path: self.path.clone(),
        })?;

        let (width, height) = (frame.meta.width, frame.meta.height);
        let description = description.as_deref();
        match frame.meta.format {
            PixelFormat::Mono8 => {
                write_page::<colortype::Gray8>(encoder, width, height, &frame.data[..], description)?
            }
            PixelFormat::Mono16 => write_page::<colortype::Gray16>(
                encoder,
                width,
                height,
                &frame.samples_u16()[..],
                description,
            )?,
            PixelFormat::Rgb24 => {
                write_page::<colortype::RGB8>(encoder, width, height, &frame.data[..], description)?
            }
        }
        self.pages += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.encoder.take().is_some() {
            if self.pages == 0 {
                warn!(path = ?self.path, "Closing empty TIFF stack");
            }
            info!(path = ?self.path, pages = self.pages, "TIFF stack written");
        }
        Ok(())
    }
}

impl Drop for TiffStackSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
