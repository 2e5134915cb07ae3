//! Proximity volume curve for spatial audio
//!
//! Volume is 1.0 inside the full-volume radius, fades linearly to 0 at the
//! maximum distance, and is 0 beyond it. Grid coordinates are integers, so
//! the squared distance is an integer in `0..=100` and the curve can be a
//! lookup table with no square root at runtime.

use once_cell::sync::Lazy;

use crate::constants::proximity::{FULL_VOLUME_DISTANCE, MAX_DISTANCE, MAX_DISTANCE_SQ};

static VOLUME_TABLE: Lazy<[f32; (MAX_DISTANCE_SQ + 1) as usize]> = Lazy::new(|| {
    let full_sq = (FULL_VOLUME_DISTANCE * FULL_VOLUME_DISTANCE) as u32;
    let mut table = [0.0f32; (MAX_DISTANCE_SQ + 1) as usize];
    for (dist_sq, slot) in table.iter_mut().enumerate() {
        *slot = if (dist_sq as u32) <= full_sq {
            1.0
        } else {
            1.0 - ((dist_sq as f32).sqrt() - FULL_VOLUME_DISTANCE)
                / (MAX_DISTANCE - FULL_VOLUME_DISTANCE)
        };
    }
    table
});

/// Volume for a position offset between two players.
///
/// Index out of table range means out of audio range and yields 0.
pub fn volume(dx: i32, dy: i32) -> f32 {
    let dist_sq = (dx * dx + dy * dy) as u32;
    volume_for_distance_sq(dist_sq)
}

/// Volume for a precomputed squared distance.
pub fn volume_for_distance_sq(dist_sq: u32) -> f32 {
    if dist_sq > MAX_DISTANCE_SQ {
        return 0.0;
    }
    VOLUME_TABLE[dist_sq as usize]
}

/// True when the offset is within audio range.
pub fn in_range(dx: i32, dy: i32) -> bool {
    ((dx * dx + dy * dy) as u32) <= MAX_DISTANCE_SQ
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_volume_inside_inner_radius() {
        assert_eq!(volume(0, 0), 1.0);
        assert_eq!(volume(1, 0), 1.0);
        assert_eq!(volume(2, 0), 1.0);
        assert_eq!(volume(1, 1), 1.0);
    }

    #[test]
    fn zero_beyond_max_distance() {
        assert_eq!(volume(11, 0), 0.0);
        assert_eq!(volume(8, 8), 0.0);
        assert_eq!(volume(0, -11), 0.0);
    }

    #[test]
    fn linear_fade_between_radii() {
        // d = 5 -> 1 - (5-2)/8 = 0.625
        assert!((volume(5, 0) - 0.625).abs() < 1e-6);
        // d = 8 -> 1 - (8-2)/8 = 0.25
        assert!((volume(8, 0) - 0.25).abs() < 1e-6);
        // d = 10 exactly on the edge is still audible (barely)
        assert!(volume(10, 0) >= 0.0);
        assert!(volume(10, 0) < 0.01);
    }

    #[test]
    fn monotonically_decreasing() {
        let mut last = f32::INFINITY;
        for d2 in 0..=MAX_DISTANCE_SQ {
            let v = volume_for_distance_sq(d2);
            assert!(v <= last, "volume increased at d2={d2}");
            assert!((0.0..=1.0).contains(&v));
            last = v;
        }
    }

    #[test]
    fn symmetric_in_offset_sign() {
        assert_eq!(volume(3, 4), volume(-3, -4));
        assert_eq!(volume(3, 4), volume(4, 3));
    }
}
