//! Interactive corner capture
//!
//! A `CaptureSession` collects four clicks in display coordinates, scales them
//! into base-image pixels and validates the resulting quad. It is bound to one
//! base image: loading another image or changing the display size means
//! starting over, never rescaling points already taken.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geometry::{Point, Quad, WindingPolicy};

const CORNER_LABELS: [&str; 4] = ["Top Left", "Top Right", "Bottom Right", "Bottom Left"];

/// Ratio converting display-space coordinates into original image pixels
pub fn scale_factor(display_width: u32, original_width: u32) -> Result<f64> {
    if display_width == 0 || original_width == 0 {
        return Err(Error::InvalidScale {
            display_width,
            original_width,
        });
    }
    Ok(original_width as f64 / display_width as f64)
}

/// Where the session is in the capture protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "points", rename_all = "lowercase")]
pub enum CaptureState {
    Empty,
    Collecting(usize),
    Complete,
}

/// A captured corner with its role label, in image pixels
#[derive(Debug, Clone, Serialize)]
pub struct CornerPoint {
    pub id: usize,
    pub label: &'static str,
    pub x: f64,
    pub y: f64,
}

/// Point accumulation for a single base image
#[derive(Debug, Clone)]
pub struct CaptureSession {
    image_width: u32,
    image_height: u32,
    display_width: u32,
    scale: f64,
    policy: WindingPolicy,
    points: Vec<Point>,
    quad: Option<Quad>,
}

impl CaptureSession {
    /// Start a session for a base image of `image_width`x`image_height` shown
    /// `display_width` pixels wide
    pub fn new(
        image_width: u32,
        image_height: u32,
        display_width: u32,
        policy: WindingPolicy,
    ) -> Result<Self> {
        let scale = scale_factor(display_width, image_width)?;
        debug!(
            "Capture session for {}x{} image (display width {}, scale {:.4})",
            image_width, image_height, display_width, scale
        );

        Ok(Self {
            image_width,
            image_height,
            display_width,
            scale,
            policy,
            points: Vec::with_capacity(4),
            quad: None,
        })
    }

    pub fn state(&self) -> CaptureState {
        match (self.points.len(), self.quad) {
            (0, _) => CaptureState::Empty,
            (_, Some(_)) => CaptureState::Complete,
            (n, None) => CaptureState::Collecting(n),
        }
    }

    /// Add a click given in display coordinates
    ///
    /// On the fourth point the quad is validated. A degenerate quad drops the
    /// offending point and leaves the session collecting with three points.
    pub fn add_point(&mut self, click: Point) -> Result<CaptureState> {
        if self.quad.is_some() {
            return Err(Error::CaptureComplete);
        }

        let point = click.scaled(self.scale);
        self.points.push(point);
        debug!(
            "Corner {} at ({:.1}, {:.1}) display -> ({:.1}, {:.1}) image",
            self.points.len(),
            click.x,
            click.y,
            point.x,
            point.y
        );

        if self.points.len() == 4 {
            let corners = [self.points[0], self.points[1], self.points[2], self.points[3]];
            match Quad::new(corners, self.policy) {
                Ok(quad) => {
                    self.points = quad.corners.to_vec();
                    self.quad = Some(quad);
                }
                Err(e) => {
                    self.points.pop();
                    warn!("Rejected fourth corner: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(self.state())
    }

    /// Forget every captured point
    pub fn reset(&mut self) {
        if !self.points.is_empty() {
            debug!("Capture session reset ({} points discarded)", self.points.len());
        }
        self.points.clear();
        self.quad = None;
    }

    /// Change the display width; captured points are discarded
    pub fn set_display_width(&mut self, display_width: u32) -> Result<()> {
        self.scale = scale_factor(display_width, self.image_width)?;
        self.display_width = display_width;
        self.reset();
        Ok(())
    }

    pub fn quad(&self) -> Option<&Quad> {
        self.quad.as_ref()
    }

    /// Consume the session, yielding the completed quad if there is one
    pub fn finish(self) -> Option<Quad> {
        self.quad
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn display_width(&self) -> u32 {
        self.display_width
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    /// Captured points labeled by the corner they will become
    pub fn corner_points(&self) -> Vec<CornerPoint> {
        self.points
            .iter()
            .zip(CORNER_LABELS)
            .enumerate()
            .map(|(id, (p, label))| CornerPoint {
                id,
                label,
                x: p.x,
                y: p.y,
            })
            .collect()
    }
}
