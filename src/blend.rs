//! Alpha compositing of the warped logo over the base photo
//!
//! The "over" operator is applied per channel directly on the encoded 8-bit
//! values (no gamma linearization): `out = a * fg + (1 - a) * bg`.

use image::RgbaImage;

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Blend `overlay` onto `base`, returning a new image in the base's format
///
/// An RGBA base keeps an alpha channel, combined as `a + (1 - a) * base_alpha`.
pub fn composite(base: &Raster, overlay: &RgbaImage) -> Result<Raster> {
    if base.dimensions() != overlay.dimensions() {
        return Err(Error::DimensionMismatch {
            base: base.dimensions(),
            overlay: overlay.dimensions(),
        });
    }

    let result = match base {
        Raster::Rgb(bg) => {
            let mut out = bg.clone();
            for (dst, fg) in out.pixels_mut().zip(overlay.pixels()) {
                let a = fg[3] as f32 / 255.0;
                for c in 0..3 {
                    dst[c] = over(fg[c], dst[c], a);
                }
            }
            Raster::Rgb(out)
        }
        Raster::Rgba(bg) => {
            let mut out = bg.clone();
            for (dst, fg) in out.pixels_mut().zip(overlay.pixels()) {
                let a = fg[3] as f32 / 255.0;
                for c in 0..3 {
                    dst[c] = over(fg[c], dst[c], a);
                }
                dst[3] = over(255, dst[3], a);
            }
            Raster::Rgba(out)
        }
    };

    Ok(result)
}

#[inline]
fn over(fg: u8, bg: u8, a: f32) -> u8 {
    (a * fg as f32 + (1.0 - a) * bg as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}
