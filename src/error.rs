//! Error kinds for the compositing core
//!
//! Geometry errors are recoverable at the interaction boundary (the user picks
//! the points again). Resource errors carry the image or path they concern.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a quadrilateral cannot be used as a projective target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadDefect {
    /// The three points centered on `index` lie on one line (or coincide)
    Collinear { index: usize },
    /// Opposite edges cross each other
    SelfIntersecting,
    /// One interior angle exceeds 180 degrees
    Concave,
    /// Corners were given counter-clockwise under the strict winding policy
    WrongWinding,
}

impl fmt::Display for QuadDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuadDefect::Collinear { index } => {
                write!(f, "points around corner {} are collinear", index)
            }
            QuadDefect::SelfIntersecting => write!(f, "edges intersect each other"),
            QuadDefect::Concave => write!(f, "quadrilateral is not convex"),
            QuadDefect::WrongWinding => write!(f, "corners are not in clockwise order"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("degenerate quadrilateral: {0}")]
    DegenerateQuadrilateral(QuadDefect),

    #[error("homography system is singular")]
    SingularSystem,

    #[error("invalid source image {what}: {reason}")]
    InvalidSource { what: String, reason: String },

    #[error(
        "overlay is {}x{} but base is {}x{}",
        overlay.0, overlay.1, base.0, base.1
    )]
    DimensionMismatch { base: (u32, u32), overlay: (u32, u32) },

    #[error("failed to write {path:?}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("capture session already holds four corners")]
    CaptureComplete,

    #[error("invalid display scale: display width {display_width}, original width {original_width}")]
    InvalidScale {
        display_width: u32,
        original_width: u32,
    },
}

impl Error {
    pub fn invalid_source(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidSource {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::IoFailure {
            path: path.into(),
            source,
        }
    }

    /// True when the user can recover by specifying the corners again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DegenerateQuadrilateral(_)
                | Error::SingularSystem
                | Error::CaptureComplete
                | Error::InvalidScale { .. }
        )
    }
}

impl From<QuadDefect> for Error {
    fn from(defect: QuadDefect) -> Self {
        Error::DegenerateQuadrilateral(defect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_errors_are_recoverable() {
        assert!(Error::from(QuadDefect::Concave).is_recoverable());
        assert!(Error::SingularSystem.is_recoverable());
        assert!(!Error::invalid_source("logo", "empty").is_recoverable());
        assert!(!Error::DimensionMismatch {
            base: (10, 10),
            overlay: (5, 5)
        }
        .is_recoverable());
    }

    #[test]
    fn test_messages_name_the_resource() {
        let err = Error::io("/tmp/out.png", io::Error::new(io::ErrorKind::Other, "disk full"));
        let msg = err.to_string();
        assert!(msg.contains("/tmp/out.png"));
        assert!(msg.contains("disk full"));

        let err = Error::invalid_source("base image \"cap.jpg\"", "zero-sized");
        assert!(err.to_string().contains("cap.jpg"));
    }
}
