//! Perspective transformation for logo placement
//!
//! This module computes the homography that maps the logo's pixel rectangle
//! onto the destination quad picked on the base image.

use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::{Point, Quad};

/// Pivots smaller than this (relative to the largest coefficient) mean a singular system
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Homogeneous weights closer to zero than this map to infinity
const W_EPSILON: f64 = 1e-12;

/// Mapped corners must land this close to their targets (pixels)
const REPROJECTION_TOLERANCE: f64 = 1e-6;

/// Perspective transformation matrix (3x3 homography), bottom-right entry fixed to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    /// Transform mapping the `logo_width`x`logo_height` rectangle onto `quad`
    pub fn solve(logo_width: u32, logo_height: u32, quad: &Quad) -> Result<Self> {
        if logo_width == 0 || logo_height == 0 {
            return Err(Error::invalid_source(
                "logo",
                format!("non-positive extent {}x{}", logo_width, logo_height),
            ));
        }

        // Solve from the unit square and scale afterwards; pixel-sized source
        // coordinates make the system badly conditioned for large logos
        let unit = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let from_unit = Self::from_correspondences(&unit, &quad.corners)?;
        #[rustfmt::skip]
        let to_unit = Matrix3::new(
            1.0 / logo_width as f64, 0.0, 0.0,
            0.0, 1.0 / logo_height as f64, 0.0,
            0.0, 0.0, 1.0,
        );

        let homography = Self {
            matrix: from_unit.matrix * to_unit,
        };
        debug!("Solved homography {:?}", homography.to_array());
        Ok(homography)
    }

    /// Exact transform taking each `src[i]` to `dst[i]`
    pub fn from_correspondences(src: &[Point; 4], dst: &[Point; 4]) -> Result<Self> {
        // Each correspondence (x,y) -> (x',y') gives two rows:
        //   x*h0 + y*h1 + h2 - x'*x*h6 - x'*y*h7 = x'
        //   x*h3 + y*h4 + h5 - y'*x*h6 - y'*y*h7 = y'
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for i in 0..4 {
            let Point { x, y } = src[i];
            let Point { x: xp, y: yp } = dst[i];

            let row1 = i * 2;
            let row2 = i * 2 + 1;

            a[row1] = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
            b[row1] = xp;

            a[row2] = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
            b[row2] = yp;
        }

        let h = solve_linear_system(&mut a, &mut b)?;
        let homography = Self {
            matrix: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        };

        // A rank-deficient matrix collapses the plane onto a line
        let norm = homography.matrix.norm();
        if homography.matrix.determinant().abs() <= PIVOT_TOLERANCE * norm.powi(3) {
            return Err(Error::SingularSystem);
        }

        for (s, d) in src.iter().zip(dst) {
            let mapped = homography.apply(*s).ok_or(Error::SingularSystem)?;
            let tolerance = REPROJECTION_TOLERANCE * (1.0 + d.x.abs().max(d.y.abs()));
            if mapped.distance(d) > tolerance {
                return Err(Error::SingularSystem);
            }
        }

        Ok(homography)
    }

    /// Map a point, or `None` when it lands on the line at infinity
    #[inline]
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        if v[2].abs() < W_EPSILON {
            return None;
        }
        Some(Point::new(v[0] / v[2], v[1] / v[2]))
    }

    /// Inverse mapping, normalized so the bottom-right entry is 1
    pub fn inverse(&self) -> Result<Self> {
        let inv = self.matrix.try_inverse().ok_or(Error::SingularSystem)?;
        let s = inv[(2, 2)];
        if s.abs() < W_EPSILON {
            return Err(Error::SingularSystem);
        }
        Ok(Self { matrix: inv / s })
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting
fn solve_linear_system(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> Result<[f64; 8]> {
    let n = 8;

    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return Err(Error::SingularSystem);
    }

    // Forward elimination with partial pivoting
    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        if max_val <= PIVOT_TOLERANCE * scale {
            return Err(Error::SingularSystem);
        }

        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularSystem);
    }

    Ok(x)
}
