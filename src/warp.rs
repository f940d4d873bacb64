//! Inverse warping of the logo into base-image space

use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::{Point, Quad};
use crate::raster::Raster;
use crate::transform::Homography;

/// Slack when testing whether a pre-image lies inside the logo
const EDGE_EPSILON: f64 = 1e-6;

/// Resample `logo` onto a transparent `canvas_width`x`canvas_height` canvas
///
/// Each canvas pixel is pulled back through the inverse homography. Pre-images
/// inside `[0, w) x [0, h)` of the logo are sampled bilinearly; everything
/// else stays fully transparent. A logo without alpha is treated as opaque.
pub fn warp(
    logo: &Raster,
    homography: &Homography,
    canvas_width: u32,
    canvas_height: u32,
) -> Result<RgbaImage> {
    if logo.is_empty() {
        return Err(Error::invalid_source(
            "logo",
            format!("non-positive extent {}x{}", logo.width(), logo.height()),
        ));
    }

    let src = logo.to_rgba();
    let inverse = homography.inverse()?;
    let mut out = RgbaImage::new(canvas_width, canvas_height);

    let Some((x0, y0, x1, y1)) = footprint(&src, homography, canvas_width, canvas_height) else {
        debug!("Logo falls entirely outside the {}x{} canvas", canvas_width, canvas_height);
        return Ok(out);
    };

    let src_w = src.width() as f64;
    let src_h = src.height() as f64;
    let mut covered = 0usize;

    for dst_y in y0..y1 {
        for dst_x in x0..x1 {
            let Some(p) = inverse.apply(Point::new(dst_x as f64, dst_y as f64)) else {
                continue;
            };

            if p.x < -EDGE_EPSILON
                || p.y < -EDGE_EPSILON
                || p.x >= src_w - EDGE_EPSILON
                || p.y >= src_h - EDGE_EPSILON
            {
                continue;
            }

            out.put_pixel(dst_x, dst_y, bilinear_sample(&src, p.x, p.y));
            covered += 1;
        }
    }

    debug!(
        "Warped {}x{} logo onto {}x{} canvas ({} pixels covered)",
        src.width(),
        src.height(),
        canvas_width,
        canvas_height,
        covered
    );
    Ok(out)
}

/// Canvas pixel range that can receive logo samples, clipped to the canvas
fn footprint(
    src: &RgbaImage,
    homography: &Homography,
    canvas_width: u32,
    canvas_height: u32,
) -> Option<(u32, u32, u32, u32)> {
    let w = src.width() as f64;
    let h = src.height() as f64;
    let corners = [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ];

    let mapped = corners.map(|c| homography.apply(c));
    let quad = match mapped {
        [Some(a), Some(b), Some(c), Some(d)] => Quad { corners: [a, b, c, d] },
        // A corner at infinity: fall back to the whole canvas
        _ => return Some((0, 0, canvas_width, canvas_height)),
    };

    let (bx0, by0, bx1, by1) = quad.bounds();
    let x0 = bx0.max(0.0).min(canvas_width as f64) as u32;
    let y0 = by0.max(0.0).min(canvas_height as f64) as u32;
    let x1 = (bx1 + 1.0).max(0.0).min(canvas_width as f64) as u32;
    let y1 = (by1 + 1.0).max(0.0).min(canvas_height as f64) as u32;

    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0, y0, x1, y1))
}

/// Bilinear interpolation of all four channels, clamping at the logo edge
#[inline]
fn bilinear_sample(src: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let width = src.width();
    let height = src.height();

    let x = x.max(0.0).min((width - 1) as f64);
    let y = y.max(0.0).min((height - 1) as f64);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut result = [0u8; 4];
    for c in 0..4 {
        let value = p00[c] as f64 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f64 * fx * (1.0 - fy)
            + p01[c] as f64 * (1.0 - fx) * fy
            + p11[c] as f64 * fx * fy;

        result[c] = value.round().clamp(0.0, 255.0) as u8;
    }

    Rgba(result)
}
