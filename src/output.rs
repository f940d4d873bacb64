//! Persisting composites
//!
//! Files are encoded into a temporary file next to the destination and renamed
//! into place, so a failed write never leaves a truncated image behind.

use std::fs;
use std::io::{self, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageError, ImageFormat, ImageOutputFormat};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{Error, Result};
use crate::geometry::Quad;
use crate::raster::Raster;

/// A composite that has been written to disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeHandle {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

/// Everything downstream reporting needs to know about one placement
#[derive(Debug, Clone, Serialize)]
pub struct PlacementRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<PathBuf>,
    pub output: PathBuf,
    pub placement: String,
    pub size_cm: (f64, f64),
    pub quad: Quad,
}

/// Encodes composites as PNG or JPEG depending on the destination extension
#[derive(Debug, Clone, Copy)]
pub struct CompositeWriter {
    jpeg_quality: u8,
}

impl Default for CompositeWriter {
    fn default() -> Self {
        Self::new(90)
    }
}

impl CompositeWriter {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Write `composite` to `destination`, replacing any existing file
    pub fn write(&self, composite: &Raster, destination: &Path) -> Result<CompositeHandle> {
        let format = match ImageFormat::from_path(destination) {
            Ok(ImageFormat::Png) => ImageOutputFormat::Png,
            Ok(ImageFormat::Jpeg) => ImageOutputFormat::Jpeg(self.jpeg_quality),
            _ => {
                return Err(Error::io(
                    destination,
                    io::Error::new(
                        io::ErrorKind::Unsupported,
                        "output must end in .png, .jpg or .jpeg",
                    ),
                ));
            }
        };

        let image: DynamicImage = match (&format, composite) {
            // JPEG has no alpha channel
            (ImageOutputFormat::Jpeg(_), Raster::Rgba(rgba)) => {
                DynamicImage::ImageRgba8(rgba.clone()).to_rgb8().into()
            }
            _ => composite.clone().into_dynamic(),
        };

        let mut encoded = Cursor::new(Vec::new());
        image
            .write_to(&mut encoded, format)
            .map_err(|e| Error::io(destination, image_to_io(e)))?;
        write_atomic(destination, encoded.get_ref())?;
        let bytes = encoded.get_ref().len() as u64;

        info!(
            "Wrote {}x{} composite to {:?} ({} bytes)",
            composite.width(),
            composite.height(),
            destination,
            bytes
        );

        Ok(CompositeHandle {
            path: destination.to_path_buf(),
            width: composite.width(),
            height: composite.height(),
            bytes,
        })
    }
}

/// Sidecar path for a composite's placement record (`preview.png` -> `preview.png.json`)
pub fn record_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Write the placement record next to its composite
pub fn write_record(record: &PlacementRecord) -> Result<PathBuf> {
    let path = record_path(&record.output);
    let mut json = serde_json::to_vec_pretty(record)
        .map_err(|e| Error::io(&path, io::Error::from(e)))?;
    json.push(b'\n');
    write_atomic(&path, &json)?;
    info!("Wrote placement record {:?}", path);
    Ok(path)
}

/// Replace `destination` with `contents` through a sibling temporary file
///
/// Missing parent directories are created here, after encoding has succeeded.
fn write_atomic(destination: &Path, contents: &[u8]) -> Result<()> {
    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::io(destination, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(destination, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer
            .write_all(contents)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::io(destination, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io(destination, e))?;

    tmp.persist(destination)
        .map_err(|e| Error::io(destination, e.error))?;
    Ok(())
}

fn image_to_io(err: ImageError) -> io::Error {
    match err {
        ImageError::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
