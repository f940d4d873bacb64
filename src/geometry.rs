//! Points and destination quadrilaterals
//!
//! Coordinates are in base-image pixels unless stated otherwise. Display-space
//! points only exist inside the capture session, which scales them before they
//! reach anything in this module.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{QuadDefect, Result};

/// Sine of the smallest corner angle still considered a real turn
const COLLINEAR_TOLERANCE: f64 = 1e-6;

/// A 2D point with floating-point pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Multiply both coordinates by a uniform scale factor
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl FromStr for Point {
    type Err = String;

    /// Parse `"x,y"`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected x,y but got {:?}", s))?;
        let x = x.trim().parse::<f64>().map_err(|e| format!("bad x in {:?}: {}", s, e))?;
        let y = y.trim().parse::<f64>().map_err(|e| format!("bad y in {:?}: {}", s, e))?;
        if !x.is_finite() || !y.is_finite() {
            return Err(format!("non-finite coordinate in {:?}", s));
        }
        Ok(Point::new(x, y))
    }
}

/// How corner order is treated before solving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindingPolicy {
    /// Accept either orientation; counter-clockwise input is reversed around the first corner
    #[default]
    Canonicalize,
    /// Require clockwise input and keep the user's order
    Strict,
}

/// Four destination corners: top-left, top-right, bottom-right, bottom-left
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    /// Validate the corners and bring them into clockwise order
    pub fn new(corners: [Point; 4], policy: WindingPolicy) -> Result<Self> {
        let orientation = check_convex(&corners)?;

        let corners = match (orientation, policy) {
            (Orientation::Clockwise, WindingPolicy::Strict) => corners,
            (Orientation::CounterClockwise, WindingPolicy::Strict) => {
                return Err(QuadDefect::WrongWinding.into());
            }
            (orientation, WindingPolicy::Canonicalize) => canonicalize(corners, orientation),
        };

        Ok(Self { corners })
    }

    /// Axis-aligned quad with its top-left corner at `(x, y)`
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Result<Self> {
        Self::new(
            [
                Point::new(x, y),
                Point::new(x + width, y),
                Point::new(x + width, y + height),
                Point::new(x, y + height),
            ],
            WindingPolicy::Strict,
        )
    }

    /// Axis-aligned quad of the given size centered on `center`
    pub fn centered(center: Point, width: f64, height: f64) -> Result<Self> {
        Self::from_rect(center.x - width / 2.0, center.y - height / 2.0, width, height)
    }

    /// Smallest integer pixel box containing the quad, as `(x0, y0, x1, y1)`
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let mut bounds = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in &self.corners {
            bounds.0 = bounds.0.min(p.x);
            bounds.1 = bounds.1.min(p.y);
            bounds.2 = bounds.2.max(p.x);
            bounds.3 = bounds.3.max(p.y);
        }
        (bounds.0.floor(), bounds.1.floor(), bounds.2.ceil(), bounds.3.ceil())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    /// Clockwise on screen (y axis pointing down)
    Clockwise,
    CounterClockwise,
}

/// Turn direction at `b` going from `a` to `c`, as the z component of the cross product
fn turn(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x)
}

/// Reject collinear, self-intersecting and concave corner sets
fn check_convex(corners: &[Point; 4]) -> Result<Orientation> {
    if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(QuadDefect::Collinear { index: 0 }.into());
    }

    let mut positive = 0;
    let mut negative = 0;

    for i in 0..4 {
        let a = &corners[(i + 3) % 4];
        let b = &corners[i];
        let c = &corners[(i + 1) % 4];

        let cross = turn(a, b, c);
        let scale = a.distance(b) * b.distance(c);
        if scale == 0.0 || cross.abs() <= COLLINEAR_TOLERANCE * scale {
            return Err(QuadDefect::Collinear { index: i }.into());
        }

        if cross > 0.0 {
            positive += 1;
        } else {
            negative += 1;
        }
    }

    match (positive, negative) {
        (4, 0) => Ok(Orientation::Clockwise),
        (0, 4) => Ok(Orientation::CounterClockwise),
        (2, 2) => Err(QuadDefect::SelfIntersecting.into()),
        _ => Err(QuadDefect::Concave.into()),
    }
}

/// Clockwise order starting from the first click; clockwise input is kept as given
fn canonicalize(corners: [Point; 4], orientation: Orientation) -> [Point; 4] {
    match orientation {
        Orientation::Clockwise => corners,
        Orientation::CounterClockwise => [corners[0], corners[3], corners[2], corners[1]],
    }
}
