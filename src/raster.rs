//! Owned 8-bit raster buffers
//!
//! Every image is decoded once into a buffer owned by the request that loaded
//! it. Grayscale and 16-bit sources are normalized to 8-bit RGB or RGBA.

use std::path::Path;

use image::{DynamicImage, RgbImage, RgbaImage};
use tracing::info;

use crate::error::{Error, Result};

/// An 8-bit raster with 3 (RGB) or 4 (RGBA) channels
#[derive(Debug, Clone, PartialEq)]
pub enum Raster {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl Raster {
    /// Decode an image file; `what` names it in errors ("base image", "logo")
    pub fn load(path: &Path, what: &str) -> Result<Self> {
        let label = format!("{} {:?}", what, path);
        let decoded = image::open(path).map_err(|e| Error::invalid_source(&label, e.to_string()))?;
        let raster = Self::from_dynamic(decoded);

        if raster.is_empty() {
            return Err(Error::invalid_source(&label, "zero-sized image"));
        }

        info!(
            "Loaded {} ({}x{}, {} channels)",
            label,
            raster.width(),
            raster.height(),
            raster.channels()
        );
        Ok(raster)
    }

    pub fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgb8(rgb) => Raster::Rgb(rgb),
            DynamicImage::ImageRgba8(rgba) => Raster::Rgba(rgba),
            other if other.color().has_alpha() => Raster::Rgba(other.to_rgba8()),
            other => Raster::Rgb(other.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Raster::Rgb(img) => img.width(),
            Raster::Rgba(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Raster::Rgb(img) => img.height(),
            Raster::Rgba(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn channels(&self) -> usize {
        match self {
            Raster::Rgb(_) => 3,
            Raster::Rgba(_) => 4,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Raw interleaved samples
    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Raster::Rgb(img) => img.as_raw(),
            Raster::Rgba(img) => img.as_raw(),
        }
    }

    /// RGBA copy; images without alpha become fully opaque
    pub fn to_rgba(&self) -> RgbaImage {
        match self {
            Raster::Rgb(img) => DynamicImage::ImageRgb8(img.clone()).to_rgba8(),
            Raster::Rgba(img) => img.clone(),
        }
    }

    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Raster::Rgb(img) => DynamicImage::ImageRgb8(img),
            Raster::Rgba(img) => DynamicImage::ImageRgba8(img),
        }
    }
}

impl From<RgbImage> for Raster {
    fn from(img: RgbImage) -> Self {
        Raster::Rgb(img)
    }
}

impl From<RgbaImage> for Raster {
    fn from(img: RgbaImage) -> Self {
        Raster::Rgba(img)
    }
}
