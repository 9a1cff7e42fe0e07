//! integer scale geometry
//!
//! Mirror-space points map back to source space by truncating integer
//! division; source extents map to mirror extents by multiplication. The
//! scaled blit itself happens server-side, so no per-pixel inverse mapping
//! exists anywhere in this crate.

use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;

use thiserror::Error;

/// Positive integer magnification factor, identical on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale(NonZeroU16);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("scale must be a positive integer")]
pub struct ParseScaleError;

impl Scale {
    pub fn new(factor: u16) -> Option<Self> {
        NonZeroU16::new(factor).map(Self)
    }

    pub fn factor(self) -> u16 {
        self.0.get()
    }

    /// Map a mirror-space point to source space. Division truncates toward
    /// zero, so a whole factor-sized block of mirror pixels collapses onto
    /// one source pixel and sub-pixel positions are lost.
    pub fn to_source(self, x: i16, y: i16) -> (i16, i16) {
        let s = i32::from(self.0.get());
        ((i32::from(x) / s) as i16, (i32::from(y) / s) as i16)
    }

    /// Map a source extent to the mirror extent. None when the scaled size
    /// no longer fits the protocol's 16-bit dimensions.
    pub fn scaled_extent(self, width: u16, height: u16) -> Option<(u16, u16)> {
        let s = u32::from(self.0.get());
        let w = u16::try_from(u32::from(width) * s).ok()?;
        let h = u16::try_from(u32::from(height) * s).ok()?;
        Some((w, h))
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Scale {
    type Err = ParseScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u16>().ok().and_then(Scale::new).ok_or(ParseScaleError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncating_division() {
        let s = Scale::new(3).unwrap();
        assert_eq!(s.to_source(5, 7), (1, 2));
        assert_eq!(s.to_source(0, 0), (0, 0));
        assert_eq!(s.to_source(2, 2), (0, 0));
    }

    #[test]
    fn test_round_trip_exact_only_at_multiples() {
        let s = Scale::new(2).unwrap();

        let (x, y) = s.to_source(150, 80);
        assert_eq!((x, y), (75, 40));
        assert_eq!((x * 2, y * 2), (150, 80));

        // odd coordinates collapse onto the same source pixel
        let (x, y) = s.to_source(151, 81);
        assert_eq!((x, y), (75, 40));
        assert_ne!((x * 2, y * 2), (151, 81));
    }

    #[test]
    fn test_negative_coordinates_truncate_toward_zero() {
        let s = Scale::new(2).unwrap();
        assert_eq!(s.to_source(-3, -4), (-1, -2));
    }

    #[test]
    fn test_identity_scale() {
        let s = Scale::new(1).unwrap();
        assert_eq!(s.to_source(123, -7), (123, -7));
        assert_eq!(s.scaled_extent(640, 480), Some((640, 480)));
    }

    #[test]
    fn test_scaled_extent() {
        let s = Scale::new(2).unwrap();
        assert_eq!(s.scaled_extent(100, 50), Some((200, 100)));
    }

    #[test]
    fn test_scaled_extent_overflow() {
        let s = Scale::new(3).unwrap();
        assert_eq!(s.scaled_extent(30000, 10), None);
        assert_eq!(s.scaled_extent(10, 30000), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("4".parse::<Scale>(), Ok(Scale::new(4).unwrap()));
        assert!("0".parse::<Scale>().is_err());
        assert!("-1".parse::<Scale>().is_err());
        assert!("2.5".parse::<Scale>().is_err());
        assert!("big".parse::<Scale>().is_err());
    }
}
