//! The compositing pipeline: solve, warp, blend, write
//!
//! One `CompositeRequest` runs strictly in sequence on the calling thread and
//! yields exactly one written composite or an error. Nothing is cached between
//! requests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::blend::composite;
use crate::config::{Config, PlacementConfig};
use crate::error::{Error, Result};
use crate::geometry::Quad;
use crate::output::{write_record, CompositeHandle, CompositeWriter, PlacementRecord};
use crate::raster::Raster;
use crate::transform::Homography;
use crate::warp::warp;

/// An image given either by path or as an already decoded buffer
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Memory(Raster),
}

impl ImageSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ImageSource::Path(p) => Some(p),
            ImageSource::Memory(_) => None,
        }
    }

    fn into_raster(self, what: &str) -> Result<Raster> {
        let raster = match self {
            ImageSource::Path(path) => Raster::load(&path, what)?,
            ImageSource::Memory(raster) => raster,
        };
        if raster.is_empty() {
            return Err(Error::invalid_source(what, "zero-sized image"));
        }
        Ok(raster)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<Raster> for ImageSource {
    fn from(raster: Raster) -> Self {
        ImageSource::Memory(raster)
    }
}

/// Everything needed to produce one composite
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    pub base: ImageSource,
    pub logo: ImageSource,
    /// Destination corners in base-image pixels
    pub quad: Quad,
    pub output: PathBuf,
}

/// Warp `logo` onto `quad` and blend it over `base`
pub fn compose(base: &Raster, logo: &Raster, quad: &Quad) -> Result<Raster> {
    if base.is_empty() {
        return Err(Error::invalid_source("base image", "zero-sized image"));
    }

    let homography = Homography::solve(logo.width(), logo.height(), quad)?;
    let warped = warp(logo, &homography, base.width(), base.height())?;
    composite(base, &warped)
}

/// Runs requests and writes their results
#[derive(Debug, Clone)]
pub struct Compositor {
    writer: CompositeWriter,
    /// Placement metadata for the record sidecar; `None` disables it
    placement: Option<PlacementConfig>,
}

impl Compositor {
    pub fn new(writer: CompositeWriter, placement: Option<PlacementConfig>) -> Self {
        Self { writer, placement }
    }

    pub fn from_config(config: &Config) -> Self {
        let placement = config
            .output
            .write_record
            .then(|| config.placement.clone());
        Self::new(CompositeWriter::new(config.output.jpeg_quality), placement)
    }

    pub fn run(&self, request: CompositeRequest) -> Result<CompositeHandle> {
        let start = Instant::now();
        let base_path = request.base.path().map(Path::to_path_buf);
        let logo_path = request.logo.path().map(Path::to_path_buf);

        let base = request.base.into_raster("base image")?;
        let logo = request.logo.into_raster("logo")?;

        let result = compose(&base, &logo, &request.quad)?;
        debug!("Composite computed in {:?}", start.elapsed());

        let handle = self.writer.write(&result, &request.output)?;

        if let Some(placement) = &self.placement {
            let record = PlacementRecord {
                base: base_path,
                logo: logo_path,
                output: handle.path.clone(),
                placement: placement.label.clone(),
                size_cm: (placement.width_cm, placement.height_cm),
                quad: request.quad,
            };
            if let Err(e) = write_record(&record) {
                // A composite without its record does not count as produced
                if let Err(remove) = fs::remove_file(&handle.path) {
                    warn!("Failed to remove {:?} after record error: {}", handle.path, remove);
                }
                return Err(e);
            }
        }

        info!("Composite ready at {:?} after {:?}", handle.path, start.elapsed());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, WindingPolicy};
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn gray_base(w: u32, h: u32) -> Raster {
        Raster::from(RgbImage::from_pixel(w, h, Rgb([128, 128, 128])))
    }

    fn quad(raw: [(f64, f64); 4]) -> Quad {
        Quad::new(raw.map(|(x, y)| Point::new(x, y)), WindingPolicy::Strict).unwrap()
    }

    #[test]
    fn test_red_square_on_gray() {
        let base = gray_base(200, 200);
        let logo = Raster::from(RgbImage::from_pixel(50, 50, Rgb([255, 0, 0])));
        let q = Quad::from_rect(75.0, 75.0, 50.0, 50.0).unwrap();

        let out = compose(&base, &logo, &q).unwrap();
        let Raster::Rgb(out) = out else {
            panic!("RGB base must give RGB output");
        };
        for (x, y, p) in out.enumerate_pixels() {
            let inside = (75..125).contains(&x) && (75..125).contains(&y);
            let expected = if inside { [255, 0, 0] } else { [128, 128, 128] };
            assert_eq!(p.0, expected, "pixel ({}, {})", x, y);
        }
    }

    #[test]
    fn test_axis_aligned_matches_plain_paste() {
        let base = gray_base(120, 100);
        let mut logo = RgbaImage::new(30, 20);
        for (x, y, p) in logo.enumerate_pixels_mut() {
            *p = Rgba([(x * 8) as u8, (y * 12) as u8, 77, ((x * 7 + y * 5) % 256) as u8]);
        }

        let (ox, oy) = (40u32, 25u32);
        let q = Quad::from_rect(ox as f64, oy as f64, 30.0, 20.0).unwrap();
        let out = compose(&base, &Raster::from(logo.clone()), &q).unwrap();

        let Raster::Rgb(base_img) = &base else { unreachable!() };
        let mut expected = base_img.clone();
        for (x, y, fg) in logo.enumerate_pixels() {
            let bg = expected.get_pixel_mut(ox + x, oy + y);
            let a = fg[3] as f32 / 255.0;
            for c in 0..3 {
                bg[c] = (a * fg[c] as f32 + (1.0 - a) * bg[c] as f32).round() as u8;
            }
        }

        for (got, want) in out.as_bytes().iter().zip(expected.as_raw()) {
            assert!((*got as i32 - *want as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_circular_mask_has_no_seam() {
        let base = gray_base(160, 140);
        let size = 40u32;
        let c = (size as f64 - 1.0) / 2.0;
        let radius = 15.0;

        let mut logo = RgbaImage::new(size, size);
        for (x, y, p) in logo.enumerate_pixels_mut() {
            let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2)).sqrt();
            let alpha = if d <= radius { 255 } else { 0 };
            *p = Rgba([20, 40, 220, alpha]);
        }

        let q = quad([(30.0, 20.0), (130.0, 35.0), (120.0, 120.0), (25.0, 100.0)]);
        let out = compose(&base, &Raster::from(logo), &q).unwrap();
        let Raster::Rgb(out) = out else { unreachable!() };

        let inverse = Homography::solve(size, size, &q).unwrap().inverse().unwrap();
        let mut replaced = 0;
        for (x, y, p) in out.enumerate_pixels() {
            let pre = inverse.apply(Point::new(x as f64, y as f64)).unwrap();
            let d = ((pre.x - c).powi(2) + (pre.y - c).powi(2)).sqrt();
            // Bilinear sampling reaches at most one pixel diagonal past the mask
            if d > radius + 1.5 {
                assert_eq!(p.0, [128, 128, 128], "seam at ({}, {})", x, y);
            } else if d < radius - 1.5 {
                assert_eq!(p.0, [20, 40, 220], "hole at ({}, {})", x, y);
                replaced += 1;
            }
        }
        assert!(replaced > 100);
    }

    #[test]
    fn test_compose_is_deterministic() {
        let base = gray_base(90, 90);
        let mut logo = RgbaImage::new(25, 17);
        for (x, y, p) in logo.enumerate_pixels_mut() {
            *p = Rgba([(x * 10) as u8, (y * 15) as u8, 3, (x * y) as u8]);
        }
        let logo = Raster::from(logo);
        let q = quad([(10.0, 12.0), (80.0, 5.0), (70.0, 85.0), (15.0, 70.0)]);

        let a = compose(&base, &logo, &q).unwrap();
        let b = compose(&base, &logo, &q).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_run_writes_image_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let base_path = dir.path().join("cap.png");
        let logo_path = dir.path().join("logo.png");
        RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]))
            .save(&base_path)
            .unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255]))
            .save(&logo_path)
            .unwrap();

        let output = dir.path().join("out/preview.png");
        let compositor = Compositor::from_config(&Config::default());
        let handle = compositor
            .run(CompositeRequest {
                base: base_path.clone().into(),
                logo: logo_path.into(),
                quad: Quad::from_rect(10.0, 10.0, 16.0, 16.0).unwrap(),
                output: output.clone(),
            })
            .unwrap();

        assert_eq!(handle.path, output);
        assert_eq!((handle.width, handle.height), (64, 48));

        let written = Raster::load(&output, "composite").unwrap();
        let Raster::Rgb(img) = written else { unreachable!() };
        assert_eq!(img.get_pixel(12, 12).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(5, 5).0, [128, 128, 128]);

        let record: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("out/preview.png.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(record["placement"], "Front Panel");
        assert_eq!(record["base"], base_path.to_str().unwrap());
    }

    #[test]
    fn test_run_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("preview.png");
        let compositor = Compositor::new(CompositeWriter::default(), None);

        compositor
            .run(CompositeRequest {
                base: gray_base(20, 20).into(),
                logo: Raster::from(RgbImage::new(4, 4)).into(),
                quad: Quad::from_rect(2.0, 2.0, 8.0, 8.0).unwrap(),
                output: output.clone(),
            })
            .unwrap();

        assert!(output.exists());
        assert!(!dir.path().join("preview.png.json").exists());
    }

    #[test]
    fn test_record_failure_removes_composite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("preview.png");
        // A directory where the record file should go
        std::fs::create_dir(dir.path().join("preview.png.json")).unwrap();

        let compositor = Compositor::from_config(&Config::default());
        let err = compositor
            .run(CompositeRequest {
                base: gray_base(20, 20).into(),
                logo: Raster::from(RgbImage::new(4, 4)).into(),
                quad: Quad::from_rect(2.0, 2.0, 8.0, 8.0).unwrap(),
                output: output.clone(),
            })
            .unwrap_err();

        assert!(matches!(err, Error::IoFailure { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_unreadable_logo_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("preview.png");
        let compositor = Compositor::new(CompositeWriter::default(), None);

        let err = compositor
            .run(CompositeRequest {
                base: gray_base(20, 20).into(),
                logo: PathBuf::from("/nonexistent/brand.png").into(),
                quad: Quad::from_rect(2.0, 2.0, 8.0, 8.0).unwrap(),
                output: output.clone(),
            })
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSource { .. }));
        assert!(err.to_string().contains("brand.png"));
        assert!(!output.exists());
    }

    #[test]
    fn test_empty_base_rejected() {
        let logo = Raster::from(RgbImage::new(4, 4));
        let q = Quad::from_rect(0.0, 0.0, 4.0, 4.0).unwrap();
        assert!(matches!(
            compose(&Raster::from(RgbImage::new(0, 0)), &logo, &q),
            Err(Error::InvalidSource { .. })
        ));
    }
}
